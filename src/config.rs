use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Process configuration, read once at startup from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub http_listen: SocketAddr,
    pub dns_listen: SocketAddr,
    pub serial_dev: PathBuf,
    pub static_path: PathBuf,
    pub err_log_path: PathBuf,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn load() -> Result<Self> {
        let http_listen = var_or("HTTP_LISTEN", "0.0.0.0:80")
            .parse()
            .context("parsing HTTP_LISTEN")?;
        let dns_listen = var_or("DNS_LISTEN", "0.0.0.0:53")
            .parse()
            .context("parsing DNS_LISTEN")?;
        Ok(Self {
            http_listen,
            dns_listen,
            serial_dev: var_or("SERIAL_DEV", "/dev/ttyS0").into(),
            static_path: var_or("STATIC_PATH", "index.html").into(),
            err_log_path: var_or("ERR_LOG", "err.log").into(),
        })
    }
}
