use crate::common::ProxyBody;
use crate::error::ProxyError;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderMap};
use hyper::{Request, Response, Uri};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::debug;
use std::time::Duration;
use url::Url;

type HttpClient = Client<HttpsConnector<HttpConnector>, Incoming>;

/// Re-issues plain (non-CONNECT) proxy requests against their origin and
/// streams the origin's response back unchanged.
#[derive(Clone)]
pub struct RequestForwarder {
    client: HttpClient,
}

impl RequestForwarder {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(connect_timeout));

        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpsConnector::new_with_connector(http)),
        }
    }

    /// Sends `req` (same method, headers and body) to the origin it names.
    ///
    /// Transport failures become `ProxyError::Upstream`; once upstream
    /// headers arrive the status and every header value are copied and the
    /// body is streamed through as it is read.
    pub async fn forward(&self, mut req: Request<Incoming>) -> Result<Response<ProxyBody>, ProxyError> {
        let target = resolve_target(&req)?;
        *req.uri_mut() = target;

        let upstream = self.client.request(req).await.map_err(|e| {
            debug!("Forwarding transport error: {}", e);
            ProxyError::upstream(&e)
        })?;

        let (parts, body) = upstream.into_parts();
        let mut response = Response::new(body.boxed());
        *response.status_mut() = parts.status;
        copy_headers(response.headers_mut(), &parts.headers);
        Ok(response)
    }
}

/// Absolute URL for a forwarded request. Origin-form targets are resolved
/// against the Host header as plain `http://`.
fn resolve_target<B>(req: &Request<B>) -> Result<Uri, ProxyError> {
    let uri = req.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let host = req
        .headers()
        .get(HOST)
        .ok_or_else(|| ProxyError::Upstream(format!("unsupported request target {}: no host", uri)))?
        .to_str()
        .map_err(|e| ProxyError::Uri(format!("Invalid Host header: {}", e)))?;

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = Url::parse(&format!("http://{}{}", host, path))?;
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::Uri(e.to_string()))
}

/// Appends every (name, value) pair of `src` onto `dst`, keeping repeated
/// names and their value order.
fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}
