use crate::auth::authorize;
use crate::common::{ProxyBody, error_response};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::forward::RequestForwarder;
use crate::tunnel::TunnelRelay;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use log::{debug, info};
use std::sync::Arc;

/// Per-request entry point: credential gate, then CONNECT goes to the
/// tunnel relay and every other method to the forwarder.
#[derive(Clone)]
pub struct RequestDispatcher {
    config: Arc<ProxyConfig>,
    tunnel: TunnelRelay,
    forwarder: RequestForwarder,
}

impl RequestDispatcher {
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        let connect_timeout = config.connect_timeout();
        Self {
            config,
            tunnel: TunnelRelay::new(connect_timeout),
            forwarder: RequestForwarder::new(connect_timeout),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        match self.process(req).await {
            Ok(response) => response,
            Err(e) => {
                if !matches!(e, ProxyError::Auth) {
                    debug!("Request failed with {}: {}", e.status_code(), e);
                }
                error_response(&e)
            }
        }
    }

    async fn process(&self, req: Request<Incoming>) -> Result<Response<ProxyBody>, ProxyError> {
        self.admit(&req)?;

        if req.method() == Method::CONNECT {
            self.tunnel.tunnel(req).await
        } else {
            self.forwarder.forward(req).await
        }
    }

    /// Rejects requests without valid credentials; logs the accepted ones.
    fn admit<B>(&self, req: &Request<B>) -> Result<(), ProxyError> {
        if !authorize(req, &self.config) {
            return Err(ProxyError::Auth);
        }
        info!("Method: {}, URL: {}", req.method(), req.uri());
        Ok(())
    }
}
