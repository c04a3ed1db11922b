//! Static list discovery: parses each entry of `cfg.static_list` into a
//! Backend with `Live = true`. Parse failures on individual entries are
//! skipped with a warning; the resulting list may be partial or empty.

use tracing::warn;

use super::DiscoveryError;
use crate::config::DiscoveryConfig;
use crate::types::{Backend, Target};

pub fn fetch(cfg: &DiscoveryConfig) -> Result<Vec<Backend>, DiscoveryError> {
    let mut backends = Vec::with_capacity(cfg.static_list.len());

    for entry in &cfg.static_list {
        match Target::parse(entry) {
            Ok(target) => backends.push(Backend::live(target)),
            Err(e) => warn!(entry = %entry, error = %e, "skipping unparseable static backend entry"),
        }
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_valid_entries() {
        let cfg = DiscoveryConfig {
            kind: "static".to_string(),
            static_list: vec!["10.0.0.1:9001".to_string(), "10.0.0.2:9001".to_string()],
        };
        let backends = fetch(&cfg).unwrap();
        assert_eq!(backends.len(), 2);
        assert!(backends.iter().all(|b| b.stats.live));
    }

    #[test]
    fn skips_bad_entries_but_keeps_good_ones() {
        let cfg = DiscoveryConfig {
            kind: "static".to_string(),
            static_list: vec!["not-a-target".to_string(), "10.0.0.2:9001".to_string()],
        };
        let backends = fetch(&cfg).unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].target.to_string(), "10.0.0.2:9001");
    }

    #[test]
    fn empty_list_is_allowed() {
        let cfg = DiscoveryConfig { kind: "static".to_string(), static_list: vec![] };
        assert!(fetch(&cfg).unwrap().is_empty());
    }
}
