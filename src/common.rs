use crate::error::ProxyError;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full, combinators::BoxBody};
use hyper::header::{CONTENT_TYPE, HeaderValue, PROXY_AUTHENTICATE};
use hyper::{Response, StatusCode};

/// Body type of every response the proxy writes: either a small buffered
/// body or an upstream body streamed through unchanged.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub const PROXY_AUTH_CHALLENGE: &str = "Basic realm=\"Provide username and password\"";

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into()).map_err(|never| match never {}).boxed()
}

/// Plain-text error response: the message followed by a newline.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full(format!("{}\n", message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Turns a request-ending error into the response the client sees.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    match err {
        ProxyError::Auth => {
            let mut response =
                text_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED, "Proxy authentication required");
            response
                .headers_mut()
                .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(PROXY_AUTH_CHALLENGE));
            response
        }
        other => text_response(other.status_code(), &other.to_string()),
    }
}
