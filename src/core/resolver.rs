// src/core/resolver.rs

//! Resolves a bootstrap endpoint into a list of config servers.

use crate::core::server_pool::Server;
use std::time::Duration;
use tracing::{debug, warn};

const ADDRESS_SERVER_TIMEOUT: Duration = Duration::from_secs(3);
const ADDRESS_SERVER_DEFAULT_PORT: u16 = 8080;

/// Resolves `endpoint` into a (possibly empty, always shuffled) list of servers.
///
/// When `cai_enabled` is false, `endpoint` itself is treated as the single server.
/// Otherwise an address-server lookup is performed against
/// `http://{endpoint}/diamond-server/diamond`, whose body is newline-separated
/// `host[:port]` tokens; a missing port in a token falls back to `default_port`.
/// Any resolution failure — network error, non-success status, empty body — yields an
/// empty list; this is a soft failure, never an error, so the caller can keep serving
/// from the failover/snapshot cache.
pub async fn resolve(
    http: &reqwest::Client,
    endpoint: &str,
    default_port: u16,
    cai_enabled: bool,
) -> Vec<Server> {
    let body = if !cai_enabled {
        debug!("cai disabled, treating endpoint '{endpoint}' as the single server");
        endpoint.to_string()
    } else {
        let address_server_endpoint = if endpoint.contains(':') {
            endpoint.to_string()
        } else {
            format!("{endpoint}:{ADDRESS_SERVER_DEFAULT_PORT}")
        };
        let url = format!("http://{address_server_endpoint}/diamond-server/diamond");
        match http.get(&url).timeout(ADDRESS_SERVER_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!("address resolver: failed to read body from {url}: {e}");
                    return Vec::new();
                }
            },
            Ok(resp) => {
                warn!("address resolver: {url} returned status {}", resp.status());
                return Vec::new();
            }
            Err(e) => {
                warn!("address resolver: request to {url} failed: {e}");
                return Vec::new();
            }
        }
    };

    let mut servers = parse_server_list(&body, default_port);

    use rand::seq::SliceRandom;
    servers.shuffle(&mut rand::thread_rng());
    servers
}

fn parse_server_list(body: &str, default_port: u16) -> Vec<Server> {
    let mut servers = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            None => servers.push(Server::new(line, default_port)),
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) => servers.push(Server::new(host, port)),
                Err(_) => warn!("address resolver: bad server address '{line}' ignored"),
            },
        }
    }
    servers
}
