//! Email dispatcher: SMTP delivery via lettre.
//!
//! The recipient address is required in the callback config; relay settings
//! ride along in the same mapping so different tasks can use different
//! transports.

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::DispatchResult;
use crate::model::Task;

const DEFAULT_SMTP_PORT: u16 = 587;

pub async fn dispatch(task: &Task) -> DispatchResult {
    let config = &task.callback_config;

    let Some(address) = config.get("address") else {
        return DispatchResult::failure(None, None, "email config missing 'address'".to_string());
    };
    let Some(smtp_host) = config.get("smtp_host") else {
        return DispatchResult::failure(None, None, "email config missing 'smtp_host'".to_string());
    };

    let to: Mailbox = match address.parse() {
        Ok(mailbox) => mailbox,
        Err(e) => {
            return DispatchResult::failure(None, None, format!("bad recipient address: {e}"));
        }
    };
    let from: Mailbox = match config
        .get("from")
        .map(String::as_str)
        .unwrap_or("tempo <no-reply@tempo.invalid>")
        .parse()
    {
        Ok(mailbox) => mailbox,
        Err(e) => return DispatchResult::failure(None, None, format!("bad sender address: {e}")),
    };

    let port: u16 = config
        .get("smtp_port")
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_SMTP_PORT);

    let subject = config
        .get("subject")
        .cloned()
        .unwrap_or_else(|| format!("Scheduled task fired: {}", task.name));

    let payload_pretty = serde_json::to_string_pretty(&task.payload).unwrap_or_default();
    let plain = format!(
        "Task '{}' fired.\n\nPayload:\n{}\n",
        task.name, payload_pretty
    );
    let html = format!(
        "<h2>Task '{}' fired</h2><pre>{}</pre>",
        task.name, payload_pretty
    );

    let message = match Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .multipart(MultiPart::alternative_plain_html(plain, html))
    {
        Ok(message) => message,
        Err(e) => return DispatchResult::failure(None, None, format!("email build: {e}")),
    };

    let builder = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host) {
        Ok(builder) => builder,
        Err(e) => return DispatchResult::failure(None, None, format!("smtp relay: {e}")),
    };
    let mut builder = builder.port(port);
    if let (Some(user), Some(password)) = (config.get("smtp_user"), config.get("smtp_password")) {
        builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
    }
    let transport = builder.build();

    match transport.send(message).await {
        Ok(_) => DispatchResult::ok(None, None),
        Err(e) => DispatchResult::failure(None, None, format!("smtp send: {e}")),
    }
}
