use crate::common::{ProxyBody, empty};
use crate::error::ProxyError;
use hyper::header::HOST;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Handles CONNECT requests: dials the origin, answers 200 and then relays
/// opaque bytes between the client connection and the origin.
#[derive(Debug, Clone)]
pub struct TunnelRelay {
    connect_timeout: Duration,
}

impl TunnelRelay {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Returns the response to write for the CONNECT request.
    ///
    /// On success the response is an empty 200 and the relay is already
    /// waiting in a background task: hyper hands over the raw client
    /// connection only after that response has been flushed, so no tunnel
    /// byte can overtake it.
    pub async fn tunnel<B>(&self, mut req: Request<B>) -> Result<Response<ProxyBody>, ProxyError> {
        let target = connect_target(&req)?;
        let origin = self.dial(&target).await?;

        let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
            warn!("Cannot take over client connection for CONNECT {}", target);
            return Err(ProxyError::HijackUnsupported);
        };

        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    debug!("Tunnel to {} established", target);
                    relay(TokioIo::new(upgraded), origin).await;
                    debug!("Tunnel to {} closed", target);
                }
                Err(e) => debug!("Client connection for {} was not handed over: {}", target, e),
            }
        });

        Ok(Response::new(empty()))
    }

    async fn dial(&self, target: &str) -> Result<TcpStream, ProxyError> {
        connect_within(target, self.connect_timeout, TcpStream::connect(target)).await
    }
}

/// Awaits `connect` for at most `limit`, turning failure or expiry into an
/// `Upstream` error that names `target`.
async fn connect_within<S, F>(target: &str, limit: Duration, connect: F) -> Result<S, ProxyError>
where
    F: Future<Output = std::io::Result<S>>,
{
    match timeout(limit, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => {
            debug!("Dial to {} failed: {}", target, e);
            Err(ProxyError::Upstream(format!("dial tcp {}: {}", target, e)))
        }
        Err(_) => {
            debug!("Dial to {} timed out after {:?}", target, limit);
            Err(ProxyError::Upstream(format!("dial tcp {}: i/o timeout", target)))
        }
    }
}

/// `host:port` named by a CONNECT request: its authority, else its Host header.
fn connect_target<B>(req: &Request<B>) -> Result<String, ProxyError> {
    if let Some(authority) = req.uri().authority() {
        return Ok(authority.to_string());
    }
    req.headers()
        .get(HOST)
        .and_then(|host| host.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProxyError::Upstream("dial tcp: missing CONNECT target".to_string()))
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToOrigin,
    OriginToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToOrigin => write!(f, "client -> origin"),
            Direction::OriginToClient => write!(f, "origin -> client"),
        }
    }
}

/// Copies bytes both ways between `client` and `origin` until either side
/// ends, then closes both.
///
/// Each direction runs as its own task. When one finishes (EOF or error) it
/// shuts down its destination and fires the shared close token, which makes
/// the other task drop its halves as well.
pub async fn relay<C, O>(client: C, origin: O)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    O: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (origin_read, origin_write) = tokio::io::split(origin);
    let closed = CancellationToken::new();

    let upstream = tokio::spawn(pump(client_read, origin_write, closed.clone(), Direction::ClientToOrigin));
    let downstream = tokio::spawn(pump(origin_read, client_write, closed, Direction::OriginToClient));

    let (upstream, downstream) = tokio::join!(upstream, downstream);
    if let (Ok(Some(sent)), Ok(Some(received))) = (&upstream, &downstream) {
        debug!("Tunnel finished: {} bytes sent, {} bytes received", sent, received);
    }
}

/// One relay direction. Returns the byte count when it ran to EOF on its own.
async fn pump<R, W>(mut source: R, mut destination: W, closed: CancellationToken, direction: Direction) -> Option<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::select! {
        result = tokio::io::copy(&mut source, &mut destination) => match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!("Tunnel {} copy failed: {}", direction, e);
                None
            }
        },
        _ = closed.cancelled() => None,
    };

    closed.cancel();
    let _ = destination.shutdown().await;
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use rand::{RngCore, SeedableRng};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, duplex};
    use tokio::net::TcpListener;

    fn payload(len: usize) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x7e57);
        let mut data = vec![0u8; len];
        rng.fill_bytes(&mut data);
        data
    }

    fn connect_request(target: &str) -> Request<()> {
        Request::builder()
            .method(Method::CONNECT)
            .uri(target)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_relay_round_trip_is_byte_identical() {
        let (test_client, proxy_client) = duplex(4096);
        let (proxy_origin, test_origin) = duplex(4096);

        let relay_task = tokio::spawn(relay(proxy_client, proxy_origin));
        tokio::spawn(async move {
            let (mut read, mut write) = tokio::io::split(test_origin);
            let _ = tokio::io::copy(&mut read, &mut write).await;
        });

        let data = payload(64 * 1024);
        let (mut client_read, mut client_write) = tokio::io::split(test_client);
        let to_send = data.clone();
        let writer = tokio::spawn(async move {
            client_write.write_all(&to_send).await.unwrap();
            client_write
        });

        let mut echoed = vec![0u8; data.len()];
        client_read.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, data);

        let client_write = writer.await.unwrap();
        drop(client_write);
        drop(client_read);

        tokio::time::timeout(Duration::from_secs(5), relay_task)
            .await
            .expect("relay did not finish after client closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_origin_close_tears_down_tunnel() {
        let (mut test_client, proxy_client) = duplex(1024);
        let (proxy_origin, mut test_origin) = duplex(1024);

        let relay_task = tokio::spawn(relay(proxy_client, proxy_origin));

        test_origin.write_all(b"bye").await.unwrap();
        drop(test_origin);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), test_client.read_to_end(&mut received))
            .await
            .expect("client never saw EOF")
            .unwrap();
        assert_eq!(received, b"bye");

        tokio::time::timeout(Duration::from_secs(5), relay_task)
            .await
            .expect("relay kept running after origin closed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stalled_dial_times_out_as_upstream_error() {
        let limit = Duration::from_millis(100);

        let started = Instant::now();
        let result =
            connect_within::<TcpStream, _>("blackhole.test:81", limit, std::future::pending()).await;
        let elapsed = started.elapsed();

        match result {
            Err(ProxyError::Upstream(text)) => {
                assert_eq!(text, "dial tcp blackhole.test:81: i/o timeout");
            }
            other => panic!("expected upstream timeout, got {:?}", other.map(|_| ())),
        }
        assert!(elapsed >= limit, "gave up early after {:?}", elapsed);
        assert!(elapsed <= limit + Duration::from_secs(1), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_stalled_dial_answers_503() {
        let err = connect_within::<TcpStream, _>(
            "blackhole.test:81",
            Duration::from_millis(20),
            std::future::pending(),
        )
        .await
        .unwrap_err();

        let response = crate::common::error_response(&err);
        assert_eq!(response.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_dial_error_keeps_cause_text() {
        let refused = async {
            Err::<TcpStream, _>(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
        };
        match connect_within("origin.test:443", Duration::from_secs(1), refused).await {
            Err(ProxyError::Upstream(text)) => {
                assert_eq!(text, "dial tcp origin.test:443: connection refused");
            }
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_refused_origin_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let relay = TunnelRelay::new(Duration::from_secs(2));
        match relay.tunnel(connect_request(&addr.to_string())).await {
            Err(ProxyError::Upstream(text)) => assert!(text.contains(&addr.to_string())),
            other => panic!("expected upstream error, got {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn test_missing_upgrade_handle_is_hijack_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = TunnelRelay::new(Duration::from_secs(2));
        let result = relay.tunnel(connect_request(&addr.to_string())).await;
        assert!(matches!(result, Err(ProxyError::HijackUnsupported)));
    }

    #[test]
    fn test_connect_target_falls_back_to_host() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("/")
            .header(HOST, "example.com:443")
            .body(())
            .unwrap();
        assert_eq!(connect_target(&req).unwrap(), "example.com:443");

        let req = connect_request("example.com:8443");
        assert_eq!(connect_target(&req).unwrap(), "example.com:8443");
    }
}
