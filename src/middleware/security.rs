use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::AppError, state::AppState};

/// Rejects requests whose `Host` is not in `TRUSTED_HOSTS`. A `*` entry
/// disables the check.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if is_trusted_host(&state.config.trusted_hosts, host) {
        return next.run(request).await;
    }

    tracing::warn!(host, "Rejected request from untrusted host");
    AppError::BadRequest("Invalid host header.".to_string()).into_response()
}

fn is_trusted_host(trusted_hosts: &[String], host_header: &str) -> bool {
    let host = strip_port(host_header.trim()).to_ascii_lowercase();
    trusted_hosts.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern == "*" {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix("*.") {
            return host.ends_with(&format!(".{suffix}"));
        }
        !host.is_empty() && host == pattern
    })
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        return host.split_once("]:").map_or(host, |(addr, _)| &host[..=addr.len()]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::is_trusted_host;

    fn hosts(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn matches_exact_hosts_ignoring_port() {
        let trusted = hosts(&["localhost", "api.hostgrowth.com.br"]);
        assert!(is_trusted_host(&trusted, "localhost:8000"));
        assert!(is_trusted_host(&trusted, "API.hostgrowth.com.br"));
        assert!(!is_trusted_host(&trusted, "evil.example"));
        assert!(!is_trusted_host(&trusted, ""));
    }

    #[test]
    fn supports_wildcards() {
        assert!(is_trusted_host(&hosts(&["*"]), "anything"));
        let trusted = hosts(&["*.hostgrowth.com.br"]);
        assert!(is_trusted_host(&trusted, "painel.hostgrowth.com.br"));
        assert!(!is_trusted_host(&trusted, "hostgrowth.com.br"));
    }

    #[test]
    fn keeps_ipv6_literals_intact() {
        assert!(is_trusted_host(&hosts(&["[::1]"]), "[::1]:8000"));
    }
}
