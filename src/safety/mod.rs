//! Safety perimeter for outbound callbacks and tool inputs.
//!
//! Everything user-controlled that can reach the network or the store goes
//! through here first: webhook URLs (SSRF), cron expressions (injection and
//! schedule abuse), payloads (size and key hygiene) and the webhook
//! signature scheme.

pub mod cron_guard;
pub mod outbound;
pub mod payload;
pub mod signing;
pub mod url_guard;

pub use cron_guard::CronGuardError;
pub use outbound::{OutboundResponse, secure_http_send};
pub use payload::PayloadError;
pub use signing::SigningError;
pub use url_guard::{UrlPolicy, ValidatedUrl, validate_webhook_url};

/// URL and outbound-transport rejections. These surface to callers as
/// `UrlRejected` with the variant's one-line message.
#[derive(Debug, thiserror::Error)]
pub enum SafetyError {
    #[error("unparseable URL: {0}")]
    InvalidUrl(String),
    #[error("scheme '{0}' is not allowed; use http or https")]
    SchemeNotAllowed(String),
    #[error("https is required in production")]
    HttpsRequired,
    #[error("hostname '{0}' is blocked (SSRF protection)")]
    HostnameBlocked(String),
    #[error("hostname '{0}' is not in the allowed webhook domains")]
    DomainNotAllowed(String),
    #[error("DNS resolution failed for '{0}'")]
    DnsFailure(String),
    #[error("address {0} is blocked (SSRF protection)")]
    IpBlocked(std::net::IpAddr),
    #[error("redirect responses are blocked (target: {0})")]
    RedirectBlocked(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}
