use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    DnsResolution { failed: usize },
    UnsupportedRecordType(String),
    BackendUnreachable(String),
    NoBackendAvailable,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::DnsResolution { failed } => {
                write!(f, "dns resolution failed for {} dynamic upstream(s)", failed)
            }
            ProxyError::UnsupportedRecordType(t) => {
                write!(f, "unsupported dns record type: {}", t)
            }
            ProxyError::BackendUnreachable(msg) => write!(f, "backend unreachable: {}", msg),
            ProxyError::NoBackendAvailable => write!(f, "no backend available"),
        }
    }
}

impl std::error::Error for ProxyError {}
