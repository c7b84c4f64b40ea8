//! Pinned, redirect-free outbound HTTP for callback dispatch.
//!
//! `secure_http_send` re-runs URL validation immediately before the request
//! and pins the connection to the first validated address, so a DNS answer
//! that changes between validation and connect (rebinding) cannot redirect
//! the request into internal address space. Redirect responses are treated
//! as errors and reported with their target location.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::redirect::Policy;
use url::Host;

use super::url_guard::{UrlPolicy, validate_webhook_url};
use super::SafetyError;

/// Response surface the dispatchers care about.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    pub body: String,
}

/// Upper bound on how much of a callback response body we read.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Send one HTTP request to a user-supplied URL with the full safety
/// treatment: fresh validation, IP pinning, no redirects, bounded timeout.
pub async fn secure_http_send(
    url_str: &str,
    method: reqwest::Method,
    headers: &[(String, String)],
    body: Option<String>,
    timeout: Duration,
    policy: &UrlPolicy,
) -> Result<OutboundResponse, SafetyError> {
    let validated = validate_webhook_url(url_str, policy).await?;

    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .timeout(timeout);

    // Domain hosts get pinned to the address we just validated; literal-IP
    // hosts already dial exactly what was checked.
    if matches!(validated.url.host(), Some(Host::Domain(_))) {
        let pinned = validated
            .addrs
            .first()
            .copied()
            .ok_or_else(|| SafetyError::DnsFailure(validated.host.clone()))?;
        builder = builder.resolve(&validated.host, SocketAddr::new(pinned, validated.port));
    }

    let client = builder
        .build()
        .map_err(|e| SafetyError::Transport(e.to_string()))?;

    let mut request = client.request(method, validated.url.clone());
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            SafetyError::Timeout
        } else {
            SafetyError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_redirection() {
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<missing Location>")
            .to_string();
        return Err(SafetyError::RedirectBlocked(location));
    }

    let body = response.text().await.unwrap_or_default();
    let body = if body.len() > MAX_RESPONSE_BYTES {
        body.chars().take(MAX_RESPONSE_BYTES).collect()
    } else {
        body
    };

    Ok(OutboundResponse {
        status: status.as_u16(),
        body,
    })
}
