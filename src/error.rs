use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Proxy authentication required")]
    Auth,

    #[error("{0}")]
    Upstream(String),

    #[error("Hijacking not supported")]
    HijackUnsupported,

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("URI error: {0}")]
    Uri(String),
}

impl ProxyError {
    /// Status written back to the client when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Auth => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProxyError::Upstream(_) | ProxyError::Url(_) | ProxyError::Uri(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::HijackUnsupported | ProxyError::Io(_) | ProxyError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Builds an `Upstream` error from an error and its whole source chain.
    pub fn upstream(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut text = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        ProxyError::Upstream(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::Auth.status_code(), StatusCode::PROXY_AUTHENTICATION_REQUIRED);
        assert_eq!(
            ProxyError::Upstream("dial failed".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ProxyError::HijackUnsupported.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ProxyError::Config("bad".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        assert_eq!(ProxyError::from(io).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ProxyError::Uri("missing host".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_upstream_keeps_source_chain() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = ProxyError::upstream(&inner);
        assert_eq!(err.to_string(), "connection refused");
    }
}
