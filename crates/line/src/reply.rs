use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use linesheet_core::config::LineConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::messages::{OutboundMessage, ReplyRequest};

const REPLY_PATH: &str = "/v2/bot/message/reply";

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("reply request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("reply api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("reply rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), ReplyError>;
}

/// Messaging API reply client, authenticated with the channel access token.
pub struct LineReplyClient {
    http: Client,
    endpoint: String,
    access_token: SecretString,
}

impl LineReplyClient {
    pub fn new(http: Client, api_base_url: &str, access_token: SecretString) -> Self {
        let endpoint = format!("{}{REPLY_PATH}", api_base_url.trim_end_matches('/'));
        Self { http, endpoint, access_token }
    }

    pub fn from_config(config: &LineConfig) -> Result<Self, ReplyError> {
        let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self::new(http, &config.api_base_url, config.channel_access_token.clone()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ReplyTransport for LineReplyClient {
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), ReplyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(&ReplyRequest { reply_token, messages })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ReplyError::Api { status: status.as_u16(), body })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentReply {
    pub reply_token: String,
    pub messages: Vec<OutboundMessage>,
}

/// Keeps replies in memory instead of sending them. Tokens registered with
/// `reject_token` fail delivery.
#[derive(Default)]
pub struct RecordingReplyTransport {
    sent: Mutex<Vec<SentReply>>,
    rejected_tokens: Mutex<HashSet<String>>,
}

impl RecordingReplyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_token(&self, reply_token: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected_tokens.lock() {
            rejected.insert(reply_token.into());
        }
    }

    pub fn sent(&self) -> Vec<SentReply> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Text of the reply addressed to `reply_token`, if one was delivered.
    pub fn text_for(&self, reply_token: &str) -> Option<String> {
        self.sent().into_iter().find(|reply| reply.reply_token == reply_token).and_then(|reply| {
            reply.messages.first().map(|message| message.as_text().to_owned())
        })
    }
}

#[async_trait]
impl ReplyTransport for RecordingReplyTransport {
    async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> Result<(), ReplyError> {
        let rejected = self
            .rejected_tokens
            .lock()
            .map(|rejected| rejected.contains(reply_token))
            .unwrap_or(false);
        if rejected {
            return Err(ReplyError::Rejected(format!("reply token `{reply_token}` is not valid")));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentReply {
                reply_token: reply_token.to_owned(),
                messages: messages.to_vec(),
            });
        }
        Ok(())
    }
}
