use super::{BuiltPackage, DeliveryRoute, RouteError};
use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// Delivers the package as a mail attachment over SMTP. A permanent
/// rejection from the server (bad recipient) is non-retryable; transport
/// failures are retried by the pipeline.
pub struct EmailRoute {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailRoute {
    pub fn new(config: SmtpConfig) -> Result<Self, RouteError> {
        let transport = if config.user.is_empty() {
            // Plain relay, e.g. a local MailHog during development.
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .build()
        } else {
            let creds = Credentials::new(config.user.clone(), config.password.clone());
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| {
                    RouteError::Configuration(format!("Failed to create SMTP relay: {}", e))
                })?
                .port(config.port)
                .credentials(creds)
                .build()
        };

        Ok(Self { config, transport })
    }
}

#[async_trait]
impl DeliveryRoute for EmailRoute {
    async fn deliver(&self, package: &BuiltPackage) -> Result<String, RouteError> {
        let from: Mailbox = self
            .config
            .sender
            .parse()
            .map_err(|e| RouteError::Configuration(format!("Invalid sender address: {}", e)))?;
        let to: Mailbox = self
            .config
            .recipient
            .parse()
            .map_err(|e| RouteError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let zip_type = ContentType::parse("application/zip")
            .map_err(|e| RouteError::Configuration(format!("Invalid content type: {}", e)))?;
        let attachment =
            Attachment::new(package.file_name.clone()).body(package.content.clone(), zip_type);

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("Submission pack {}", package.submission_id))
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body("Submission package attached.".to_string()),
                    )
                    .singlepart(attachment),
            )
            .map_err(|e| RouteError::SendFailed(format!("Failed to build message: {}", e)))?;

        match self.transport.send(message).await {
            Ok(_) => {
                tracing::info!(
                    tenant_id = %package.tenant_id,
                    submission_id = %package.submission_id,
                    to = %self.config.recipient,
                    "Package sent by email"
                );
                Ok(format!("email:sent:{}", self.config.recipient))
            }
            Err(e) if e.is_permanent() => Err(RouteError::InvalidRecipient(format!(
                "Recipient rejected: {}",
                e
            ))),
            Err(e) => Err(RouteError::Connection(format!("SMTP send failed: {}", e))),
        }
    }
}
