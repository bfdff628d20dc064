use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{Reservation, ReservationStatus};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay unreachable: {0}")]
    Transport(String),
    #[error("mail relay rejected the message: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        MailError::Transport(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct SendEmail<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailReply {
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A rendered message ready for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// The email a requester gets when their reservation is approved or rejected.
/// `None` for any other status.
pub fn status_notice(
    reservation: &Reservation,
    facility_name: &str,
    recipient_name: &str,
    recipient_email: &str,
) -> Option<Mail> {
    let verdict = match reservation.status {
        ReservationStatus::Approved => "approved",
        ReservationStatus::Rejected => "rejected",
        ReservationStatus::Request | ReservationStatus::Pending => return None,
    };
    let subject = format!("Reservation {} {verdict}", reservation.id);
    let html = format!(
        "<p>Hello {name},</p>\
         <p>Your reservation <strong>{id}</strong> has been <strong>{verdict}</strong>.</p>\
         <table>\
         <tr><td>Facility</td><td>{facility}</td></tr>\
         <tr><td>Date</td><td>{date}</td></tr>\
         <tr><td>Time</td><td>{start} to {end}</td></tr>\
         <tr><td>Title</td><td>{title}</td></tr>\
         </table>",
        name = escape_html(recipient_name),
        id = escape_html(&reservation.id),
        facility = escape_html(facility_name),
        date = reservation.date.format("%B %-d, %Y"),
        start = reservation.span.start_time(),
        end = reservation.span.end_time(),
        title = escape_html(&reservation.title),
    );
    Some(Mail {
        to: recipient_email.to_string(),
        subject,
        html,
    })
}

/// Client for the external mail relay.
pub struct Mailer {
    http_client: Client,
    base_url: Option<String>,
}

impl Mailer {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self, MailError> {
        Ok(Self {
            http_client: Client::builder().timeout(timeout).build()?,
            base_url,
        })
    }

    /// A mailer that skips every send.
    pub fn disabled() -> Self {
        Self {
            http_client: Client::new(),
            base_url: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Posts one message. `Ok(None)` when no relay is configured, otherwise the relay's message id.
    pub async fn send(&self, mail: &Mail) -> Result<Option<String>, MailError> {
        let Some(base_url) = &self.base_url else {
            warn!("no mail relay configured, skipping mail to {}", mail.to);
            return Ok(None);
        };

        let response = self
            .http_client
            .post(format!("{base_url}/api/send-email"))
            .json(&SendEmail {
                to: &mail.to,
                subject: &mail.subject,
                html: &mail.html,
            })
            .send()
            .await?;

        // The relay reports refusals in the body, sometimes with an error status.
        let status = response.status();
        let reply: SendEmailReply = match response.json().await {
            Ok(reply) => reply,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(MailError::Transport(format!("relay answered {status}"))),
        };
        if reply.success {
            Ok(reply.message_id)
        } else {
            Err(MailError::Rejected(
                reply.error.unwrap_or_else(|| format!("no reason given ({status})")),
            ))
        }
    }

    /// Fire-and-forget: the outcome is logged, never retried.
    pub fn dispatch(self: &Arc<Self>, mail: Mail) {
        let mailer = self.clone();
        tokio::spawn(async move {
            match mailer.send(&mail).await {
                Ok(Some(message_id)) => {
                    metrics::counter!(crate::observability::MAIL_SENT_TOTAL).increment(1);
                    info!("mailed {} ({message_id})", mail.to);
                }
                Ok(None) => debug!("mail to {} skipped", mail.to),
                Err(e) => {
                    metrics::counter!(crate::observability::MAIL_FAILURES_TOTAL).increment(1);
                    warn!("mail to {} failed: {e}", mail.to);
                }
            }
        });
    }
}
