use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::app_config::SmtpConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub content_id: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A fully composed report email.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: String,
    pub inline_images: Vec<InlineImage>,
    pub attachment: Option<FileAttachment>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .with_context(|| format!("invalid SMTP relay {}", config.server))?
            .port(config.port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ))
            .build();
        let from = config
            .sender()
            .parse()
            .with_context(|| format!("invalid sender address {}", config.sender()))?;

        Ok(Self { transport, from })
    }
}

fn content_type(raw: &str) -> anyhow::Result<ContentType> {
    ContentType::parse(raw).with_context(|| format!("invalid content type {raw}"))
}

pub fn build_message(from: &Mailbox, message: &OutgoingMessage) -> anyhow::Result<Message> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(message.subject.clone());
    for recipient in &message.recipients {
        let mailbox: Mailbox = recipient
            .parse()
            .with_context(|| format!("invalid recipient address {recipient}"))?;
        builder = builder.to(mailbox);
    }

    let mut related = MultiPart::related().singlepart(SinglePart::html(message.html.clone()));
    for image in &message.inline_images {
        related = related.singlepart(
            Attachment::new_inline(image.content_id.clone())
                .body(image.bytes.clone(), content_type(&image.content_type)?),
        );
    }

    let body = match &message.attachment {
        Some(file) => MultiPart::mixed().multipart(related).singlepart(
            Attachment::new(file.filename.clone())
                .body(file.bytes.clone(), content_type(&file.content_type)?),
        ),
        None => related,
    };

    builder
        .multipart(body)
        .context("failed to assemble email message")
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &OutgoingMessage) -> anyhow::Result<()> {
        let email = build_message(&self.from, message)?;
        self.transport
            .send(email)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}

/// Writes every message into a directory instead of delivering it.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create outbox {}", dir.display()))?;
        Ok(Self { dir })
    }
}

pub fn file_slug(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl MailTransport for OutboxMailer {
    async fn send(&self, message: &OutgoingMessage) -> anyhow::Result<()> {
        let slug = file_slug(&message.subject);
        let html_path = self.dir.join(format!("{slug}.html"));
        let header = format!(
            "<!-- To: {} -->\n<!-- Subject: {} -->\n",
            message.recipients.join(", "),
            message.subject
        );
        tokio::fs::write(&html_path, format!("{header}{}", message.html))
            .await
            .with_context(|| format!("failed to write {}", html_path.display()))?;

        for image in &message.inline_images {
            let path = self.dir.join(format!("{slug}_{}", image.filename));
            tokio::fs::write(&path, &image.bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        if let Some(file) = &message.attachment {
            let path = self.dir.join(&file.filename);
            tokio::fs::write(&path, &file.bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        Ok(())
    }
}
