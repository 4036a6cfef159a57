use url::Url;

use crate::errors::{PerfError, Result};
use crate::types::Protocol;

/// Split a server URL into protocol, host and port.
///
/// A bare host such as `localhost` or `localhost:8001` is taken as HTTP.
/// Without an explicit port the protocol's default is used.
pub fn parse_server_url(server_url: &str) -> Result<(Protocol, String, u16)> {
    let invalid = |detail: &str| PerfError::InvalidServerUrl {
        url: server_url.to_string(),
        detail: detail.to_string(),
    };

    let trimmed = server_url.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;

    let protocol = match parsed.scheme() {
        "http" | "https" => Protocol::Http,
        "grpc" => Protocol::Grpc,
        other => return Err(invalid(&format!("unsupported protocol '{other}'"))),
    };

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?
        .to_string();

    let port = parsed.port().unwrap_or_else(|| protocol.default_port());

    Ok((protocol, host, port))
}
