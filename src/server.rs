use crate::config::ProxyConfig;
use crate::dispatch::RequestDispatcher;
use crate::error::ProxyError;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

/// Accepts proxy clients and serves each connection on its own task.
///
/// Connections are served as HTTP/1.1 only, with upgrades enabled so CONNECT
/// requests can take over the raw stream.
pub struct ProxyServer {
    listener: TcpListener,
    dispatcher: RequestDispatcher,
}

impl ProxyServer {
    pub async fn bind(config: ProxyConfig) -> Result<Self, ProxyError> {
        let addr = config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, config))
    }

    pub fn from_listener(listener: TcpListener, config: ProxyConfig) -> Self {
        Self {
            listener,
            dispatcher: RequestDispatcher::new(Arc::new(config)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        info!("Starting proxy server on {}", self.local_addr()?);
        if self.dispatcher.config().auth_required() {
            info!("Proxy authentication enabled");
        }

        loop {
            let (stream, remote_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };

            tokio::spawn(serve_connection(stream, remote_addr, self.dispatcher.clone()));
        }
    }
}

async fn serve_connection(stream: TcpStream, remote_addr: SocketAddr, dispatcher: RequestDispatcher) {
    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        async move { Ok::<_, Infallible>(dispatcher.handle(req).await) }
    });

    if let Err(err) = ServerBuilder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("Error serving connection from {}: {}", remote_addr, err);
    }
}
