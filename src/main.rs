use clap::Parser;
use log::{error, info};
use tokio::signal;
use tollgate_proxy::config::{LoggingConfig, ProxyConfig};
use tollgate_proxy::{ProxyServer, logging};

#[derive(Parser)]
#[clap(
    version,
    about = "HTTP forward proxy with CONNECT tunneling and optional Basic authentication"
)]
struct Args {
    #[clap(long, value_name = "PORT", help = "Specify the port the proxy will run on [default: 3000]")]
    port: Option<String>,

    #[clap(long, value_name = "USERNAME", help = "Username for proxy authentication")]
    username: Option<String>,

    #[clap(long, value_name = "PASSWORD", help = "Password for proxy authentication")]
    password: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "JSON configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Origin connect timeout in seconds [default: 10]")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "LEVEL", value_parser = logging::parse_log_level, help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<tollgate_proxy::config::LogLevel>,

    #[clap(long, value_name = "FORMAT", value_parser = logging::parse_log_format, help = "Log format: text or json")]
    log_format: Option<tollgate_proxy::config::LogFormat>,

    #[clap(long, value_name = "FILE", help = "Write the resolved configuration as JSON to FILE and exit")]
    write_config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&resolve_logging(&args, &file_config))?;

    let config = match resolve_config(&args, file_config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    if let Some(path) = &args.write_config {
        config.to_file(path)?;
        info!("Configuration written to {}", path);
        return Ok(());
    }

    let server = ProxyServer::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

fn resolve_logging(args: &Args, file_config: &ProxyConfig) -> LoggingConfig {
    LoggingConfig {
        level: args.log_level.unwrap_or(file_config.logging.level),
        format: args.log_format.unwrap_or(file_config.logging.format),
    }
}

/// Command-line values win over the file; credentials are taken as a pair
/// from whichever source sets them.
fn resolve_config(args: &Args, file_config: ProxyConfig) -> Result<ProxyConfig, tollgate_proxy::ProxyError> {
    let port = args.port.clone().unwrap_or_else(|| file_config.listen_port.clone());

    let (username, password) = if args.username.is_some() || args.password.is_some() {
        (
            args.username.clone().unwrap_or_default(),
            args.password.clone().unwrap_or_default(),
        )
    } else {
        match &file_config.credentials {
            Some(creds) => (creds.username.clone(), creds.password.clone()),
            None => (String::new(), String::new()),
        }
    };

    let connect_timeout = args.connect_timeout.unwrap_or(file_config.connect_timeout_secs);
    let logging = resolve_logging(args, &file_config);

    Ok(ProxyConfig::new(port, username, password)?
        .with_connect_timeout(connect_timeout)
        .with_logging(logging))
}
