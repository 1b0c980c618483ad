pub mod auth;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod logging;
pub mod server;
pub mod tunnel;

pub use config::{Credentials, ProxyConfig};
pub use dispatch::RequestDispatcher;
pub use error::ProxyError;
pub use server::ProxyServer;
