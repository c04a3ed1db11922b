//! Error taxonomy. Configuration and bind errors are fatal at
//! startup; session/relay errors are recovered locally by the dataplane.

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to bind udp socket on {addr}: {source}")]
    Udp { addr: String, #[source] source: std::io::Error },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no backends available")]
    NoBackends,
    #[error("backend {0} is not in the live set")]
    BackendUnresolved(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),
}
