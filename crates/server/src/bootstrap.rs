use std::sync::Arc;

use axum::Router;
use linesheet_core::config::{AppConfig, ConfigError};
use linesheet_core::domain::record::fixed_offset;
use linesheet_core::{DomainError, MessageBuffer, SpreadsheetSink};
use linesheet_line::{
    default_dispatcher, BatchProcessor, LineReplyClient, ReplyError, ReplyTransport,
    SignatureError, SignatureVerifier,
};
use linesheet_sheets::{GoogleSheetsSink, SheetsError};
use thiserror::Error;
use tracing::info;

use crate::{health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub buffer: Arc<MessageBuffer>,
    pub verifier: SignatureVerifier,
    pub processor: BatchProcessor,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("spreadsheet sink setup failed: {0}")]
    Sheets(#[from] SheetsError),
    #[error("reply client setup failed: {0}")]
    Reply(#[from] ReplyError),
    #[error("signature verifier setup failed: {0}")]
    Signature(#[from] SignatureError),
}

impl Application {
    pub fn router(&self) -> Router {
        Router::new()
            .merge(health::router(Arc::clone(&self.buffer)))
            .merge(webhook::router(webhook::WebhookState {
                verifier: self.verifier.clone(),
                processor: self.processor.clone(),
            }))
    }
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let utc_offset = fixed_offset(config.sheets.utc_offset_minutes)?;
    let sink: Arc<dyn SpreadsheetSink> = Arc::new(GoogleSheetsSink::from_config(&config.sheets)?);
    info!(
        event_name = "system.bootstrap.sink_ready",
        correlation_id = "bootstrap",
        sheet_title = %config.sheets.sheet_title,
        "google sheets sink configured"
    );

    let transport: Arc<dyn ReplyTransport> = Arc::new(LineReplyClient::from_config(&config.line)?);
    let verifier = SignatureVerifier::new(&config.line.channel_secret)?;

    let buffer = Arc::new(MessageBuffer::new());
    let dispatcher =
        default_dispatcher(Arc::clone(&buffer), sink, config.bot.save_command.clone(), utc_offset);
    let processor = BatchProcessor::new(Arc::new(dispatcher), transport);
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        "application bootstrap complete"
    );

    Ok(Application { config, buffer, verifier, processor })
}
