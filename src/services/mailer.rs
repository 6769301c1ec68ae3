use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};

pub const ALERT_SUBJECT: &str = "Feed Monitor Down";

/// SMTPS endpoints for sender domains that need no explicit server setting.
const KNOWN_SMTP_SERVERS: [(&str, &str, u16); 2] = [
    ("qq.com", "smtp.qq.com", 465),
    ("163.com", "smtp.163.com", 465),
];

/// SMTP server and port for the sender account. Explicit settings win over
/// the built-in table; an unknown domain without them is a config error.
pub fn smtp_endpoint(email: &EmailConfig) -> Result<(String, u16)> {
    let known = KNOWN_SMTP_SERVERS
        .iter()
        .find(|(suffix, _, _)| email.username.ends_with(suffix));

    let server = email
        .smtp_server
        .clone()
        .or_else(|| known.map(|(_, server, _)| server.to_string()));
    let port = email.smtp_port.or_else(|| known.map(|(_, _, port)| *port));

    match (server, port) {
        (Some(server), Some(port)) => Ok((server, port)),
        _ => Err(AppError::config(format!(
            "no SMTP server known for {}; set email.smtp_server and email.smtp_port",
            email.username
        ))),
    }
}

pub fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| AppError::config(format!("invalid email address {:?}: {}", address, e)))
}

/// Sends operator alerts over SMTP with implicit TLS.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    receiver: Mailbox,
}

impl Mailer {
    pub fn new(email: &EmailConfig) -> Result<Self> {
        let (server, port) = smtp_endpoint(email)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&server)
            .map_err(|e| AppError::Notify(format!("cannot set up SMTP for {}: {}", server, e)))?
            .port(port)
            .credentials(Credentials::new(
                email.username.clone(),
                email.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            sender: parse_mailbox(&email.username)?,
            receiver: parse_mailbox(&email.receiver)?,
        })
    }

    pub async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(self.receiver.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Notify(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Notify(e.to_string()))?;
        Ok(())
    }

    /// Mails `report` to the operator. Failures are logged and dropped.
    pub async fn notify_failure(&self, report: &str) {
        match self.send(ALERT_SUBJECT, report).await {
            Ok(()) => info!("Alert sent to {}", self.receiver),
            Err(e) => error!("Could not send alert to {}: {}", self.receiver, e),
        }
    }
}
