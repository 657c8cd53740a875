use serde::Serialize;
use std::io::Write;

use crate::error::{Error, Result};
use crate::executor::Runner;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
    pub host: String,
    pub url: String,
    pub status: u16,
    pub body: String,
}

pub fn ping_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/ping", host, port)
}

/// GET `/ping` on every host and echo the raw body. One attempt per host.
pub fn ping(runner: &Runner, out: &mut dyn Write) -> Result<Vec<PingResult>> {
    let ctx = runner.ctx();
    let mut results = Vec::new();

    for host in ctx.require_hosts()? {
        let url = ping_url(host, ctx.service.port);
        log_status!("ping", "{}", url);

        let response = runner.executor().http_get(&url)?;
        writeln!(out, "{}", response.body.trim_end()).map_err(|e| {
            Error::internal_io(e.to_string(), Some("write ping response".to_string()))
        })?;

        results.push(PingResult {
            host: host.clone(),
            url,
            status: response.status,
            body: response.body,
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_service_port() {
        assert_eq!(ping_url("web1", 9999), "http://web1:9999/ping");
    }
}
