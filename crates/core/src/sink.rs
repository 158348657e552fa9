use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::record::SaveRecord;

/// Sink stage that failed. Every stage failure leaves the caller's buffer
/// untouched so the user can retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkStage {
    Authenticate,
    LoadMetadata,
    CreateSheet,
    ReadRows,
    WriteHeader,
    AppendRow,
}

impl SinkStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::LoadMetadata => "load_metadata",
            Self::CreateSheet => "create_sheet",
            Self::ReadRows => "read_rows",
            Self::WriteHeader => "write_header",
            Self::AppendRow => "append_row",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("spreadsheet save failed during {}: {message}", .stage.as_str())]
pub struct SinkError {
    pub stage: SinkStage,
    pub message: String,
}

impl SinkError {
    pub fn new(stage: SinkStage, message: impl Into<String>) -> Self {
        Self { stage, message: message.into() }
    }
}

#[async_trait]
pub trait SpreadsheetSink: Send + Sync {
    /// Appends one row for `record`. Returns only after the remote append has
    /// completed.
    async fn save(&self, record: &SaveRecord) -> Result<(), SinkError>;
}

/// In-process sink that records every save and can be told to fail.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<SaveRecord>>,
    failure: Mutex<Option<SinkError>>,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: SinkError) -> Self {
        let sink = Self::default();
        sink.set_failure(Some(error));
        sink
    }

    pub fn set_failure(&self, error: Option<SinkError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    pub fn saved(&self) -> Vec<SaveRecord> {
        self.saved.lock().map(|saved| saved.clone()).unwrap_or_default()
    }

    /// Number of `save` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpreadsheetSink for MemorySink {
    async fn save(&self, record: &SaveRecord) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failure = self.failure.lock().ok().and_then(|failure| failure.clone());
        if let Some(error) = failure {
            return Err(error);
        }

        if let Ok(mut saved) = self.saved.lock() {
            saved.push(record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::{MemorySink, SinkError, SinkStage, SpreadsheetSink};
    use crate::domain::{record::SaveRecord, user::UserId};

    fn record() -> SaveRecord {
        let saved_at = FixedOffset::east_opt(8 * 3600)
            .and_then(|offset| offset.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).single())
            .expect("valid instant");
        SaveRecord::new(UserId::new("U1"), vec!["a".to_owned()], saved_at).expect("record")
    }

    #[test]
    fn sink_error_message_names_the_stage() {
        let error = SinkError::new(SinkStage::WriteHeader, "403 forbidden");

        assert_eq!(error.to_string(), "spreadsheet save failed during write_header: 403 forbidden");
    }

    #[tokio::test]
    async fn memory_sink_records_successful_saves() {
        let sink = MemorySink::new();

        sink.save(&record()).await.expect("save");

        assert_eq!(sink.saved(), vec![record()]);
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn memory_sink_failure_is_returned_and_counted() {
        let sink = MemorySink::failing(SinkError::new(SinkStage::AppendRow, "boom"));

        let result = sink.save(&record()).await;

        assert_eq!(result, Err(SinkError::new(SinkStage::AppendRow, "boom")));
        assert!(sink.saved().is_empty());
        assert_eq!(sink.attempts(), 1);
    }
}
