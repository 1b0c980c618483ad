use crate::config::ProxyConfig;
use base64::{Engine as _, engine::general_purpose};
use hyper::Request;
use hyper::header::PROXY_AUTHORIZATION;

const BASIC_PREFIX: &str = "Basic ";

/// Decides whether `req` carries the configured proxy credentials.
///
/// With no credentials configured every request is accepted. Otherwise the
/// first `Proxy-Authorization` header must hold `Basic <base64(user:pass)>`;
/// the decoded payload is split at its first `:` and both halves must match
/// the configured pair byte for byte.
pub fn authorize<B>(req: &Request<B>, config: &ProxyConfig) -> bool {
    let Some(expected) = &config.credentials else {
        return true;
    };

    let Some(header) = req.headers().get(PROXY_AUTHORIZATION) else {
        return false;
    };
    let Some(encoded) = header.as_bytes().strip_prefix(BASIC_PREFIX.as_bytes()) else {
        return false;
    };
    let Ok(payload) = general_purpose::STANDARD.decode(encoded) else {
        return false;
    };

    let mut parts = payload.splitn(2, |b| *b == b':');
    match (parts.next(), parts.next()) {
        (Some(username), Some(password)) => {
            username == expected.username.as_bytes() && password == expected.password.as_bytes()
        }
        _ => false,
    }
}
