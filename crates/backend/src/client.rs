use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

/// Effective proxy setting for the backend API.
#[derive(Debug, PartialEq, Eq)]
enum ProxyResolution {
    UseProxy(String),
    /// `proxy = ""`: bypass every proxy, including the environment's.
    ForceDirectConnect,
    /// Unset: reqwest reads HTTPS_PROXY / HTTP_PROXY itself.
    FollowEnvironment,
}

fn resolve_proxy(proxy: Option<&str>) -> ProxyResolution {
    match proxy.map(str::trim) {
        Some("") => ProxyResolution::ForceDirectConnect,
        Some(p) => ProxyResolution::UseProxy(p.to_string()),
        None => ProxyResolution::FollowEnvironment,
    }
}

/// Build the HTTP client used for conversation polling.
///
/// - `proxy`: None = follow environment, Some("") = force direct connect,
///   Some("http://...") = use that proxy
/// - `api_base`: only used for logging
pub fn build_http_client(proxy: Option<&str>, api_base: &str, timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(proxy) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "Backend API using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!(api_base = %api_base, "Backend API forced to direct connect (proxy disabled)");
            builder = builder.no_proxy();
        }
        ProxyResolution::FollowEnvironment => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}
