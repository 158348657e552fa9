//! Google Sheets backend for the spreadsheet sink.
//!
//! - **Auth** (`auth`) - service-account JWT bearer exchange, one token per save
//! - **Client** (`client`) - the handful of Sheets v4 REST calls the sink needs
//! - **Sink** (`sink`) - `GoogleSheetsSink`, the `SpreadsheetSink` implementation

pub mod auth;
pub mod client;
pub mod sink;

use thiserror::Error;

pub use auth::{AccessToken, AccessTokenSource, ServiceAccountTokenSource, StaticTokenSource};
pub use client::{SheetProperties, SheetsClient, Spreadsheet};
pub use sink::GoogleSheetsSink;

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("invalid service account key: {0}")]
    InvalidKey(String),
    #[error("could not sign token assertion: {0}")]
    Assertion(String),
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("google api returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}
