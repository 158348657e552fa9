use std::time::Duration;

use async_trait::async_trait;
use linesheet_core::config::SheetsConfig;
use linesheet_core::sink::{SinkError, SinkStage, SpreadsheetSink};
use linesheet_core::{SaveRecord, SHEET_HEADER};
use reqwest::Client;
use tracing::{debug, info};

use crate::auth::{AccessTokenSource, ServiceAccountTokenSource};
use crate::client::{a1_range, data_row_count, SheetsClient};
use crate::SheetsError;

/// Appends save records to the first sheet of a Google spreadsheet.
///
/// Each `save` authenticates and reloads document metadata from scratch, so a
/// revoked key or a deleted tab is noticed on the very next save.
pub struct GoogleSheetsSink<T = ServiceAccountTokenSource> {
    client: SheetsClient,
    tokens: T,
    fallback_sheet_title: String,
}

impl GoogleSheetsSink<ServiceAccountTokenSource> {
    pub fn from_config(config: &SheetsConfig) -> Result<Self, SheetsError> {
        let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        let tokens = ServiceAccountTokenSource::new(
            config.client_email.clone(),
            &config.private_key,
            config.token_url.clone(),
        )?;
        let client = SheetsClient::new(http, &config.api_base_url, config.spreadsheet_id.clone())?;

        Ok(Self::new(client, tokens, config.sheet_title.clone()))
    }
}

impl<T> GoogleSheetsSink<T>
where
    T: AccessTokenSource,
{
    pub fn new(client: SheetsClient, tokens: T, fallback_sheet_title: impl Into<String>) -> Self {
        Self { client, tokens, fallback_sheet_title: fallback_sheet_title.into() }
    }
}

fn at(stage: SinkStage) -> impl FnOnce(SheetsError) -> SinkError {
    move |error| SinkError::new(stage, error.to_string())
}

#[async_trait]
impl<T> SpreadsheetSink for GoogleSheetsSink<T>
where
    T: AccessTokenSource + 'static,
{
    async fn save(&self, record: &SaveRecord) -> Result<(), SinkError> {
        let token = self
            .tokens
            .access_token(self.client.http())
            .await
            .map_err(at(SinkStage::Authenticate))?;

        let spreadsheet =
            self.client.spreadsheet(&token).await.map_err(at(SinkStage::LoadMetadata))?;
        let sheet_title = match spreadsheet.first_sheet() {
            Some(sheet) => sheet.title.clone(),
            None => {
                info!(
                    event_name = "sheets.sheet.create",
                    sheet_title = %self.fallback_sheet_title,
                    "spreadsheet has no sheets; creating one"
                );
                self.client
                    .add_sheet(&token, &self.fallback_sheet_title)
                    .await
                    .map_err(at(SinkStage::CreateSheet))?
                    .title
            }
        };

        let existing = self
            .client
            .values(&token, &a1_range(&sheet_title, "A:C"))
            .await
            .map_err(at(SinkStage::ReadRows))?;
        if data_row_count(&existing) == 0 {
            debug!(
                event_name = "sheets.header.write",
                sheet_title = %sheet_title,
                "writing header row"
            );
            let header = vec![SHEET_HEADER.iter().map(|cell| cell.to_string()).collect()];
            self.client
                .update_values(&token, &a1_range(&sheet_title, "A1:C1"), &header)
                .await
                .map_err(at(SinkStage::WriteHeader))?;
        }

        let row = vec![record.row().to_vec()];
        self.client
            .append_values(&token, &a1_range(&sheet_title, "A1:C1"), &row)
            .await
            .map_err(at(SinkStage::AppendRow))?;

        info!(
            event_name = "sheets.row.appended",
            user_id = %record.user_id,
            message_count = record.message_count(),
            sheet_title = %sheet_title,
            "appended save record"
        );
        Ok(())
    }
}
