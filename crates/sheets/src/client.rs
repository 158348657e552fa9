use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AccessToken;
use crate::SheetsError;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    #[serde(default)]
    pub sheet_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: i64,
}

#[derive(Clone, Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

impl Spreadsheet {
    pub fn sheets(&self) -> impl Iterator<Item = &SheetProperties> {
        self.sheets.iter().map(|entry| &entry.properties)
    }

    /// Lowest-index sheet, i.e. the first tab in the document.
    pub fn first_sheet(&self) -> Option<&SheetProperties> {
        self.sheets().min_by_key(|properties| properties.index)
    }
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<BatchUpdateReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateReply {
    add_sheet: Option<SheetEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

/// Thin client over the Sheets v4 REST surface used by the sink.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    api_base_url: Url,
    spreadsheet_id: String,
}

impl SheetsClient {
    pub fn new(
        http: Client,
        api_base_url: &str,
        spreadsheet_id: impl Into<String>,
    ) -> Result<Self, SheetsError> {
        let api_base_url = Url::parse(api_base_url)
            .map_err(|error| SheetsError::InvalidUrl(format!("{api_base_url}: {error}")))?;
        if api_base_url.cannot_be_a_base() {
            return Err(SheetsError::InvalidUrl(format!("{api_base_url} cannot be a base url")));
        }

        Ok(Self { http, api_base_url, spreadsheet_id: spreadsheet_id.into() })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn spreadsheet(&self, token: &AccessToken) -> Result<Spreadsheet, SheetsError> {
        let mut url = self.endpoint(&[&self.spreadsheet_id]);
        url.query_pairs_mut().append_pair("fields", "sheets.properties(sheetId,title,index)");

        let response = self.http.get(url).bearer_auth(token.bearer()).send().await?;
        decode(ensure_success(response).await?, "spreadsheet metadata").await
    }

    pub async fn add_sheet(
        &self,
        token: &AccessToken,
        title: &str,
    ) -> Result<SheetProperties, SheetsError> {
        let url = self.endpoint(&[&format!("{}:batchUpdate", self.spreadsheet_id)]);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });

        let response = self.http.post(url).bearer_auth(token.bearer()).json(&body).send().await?;
        let update: BatchUpdateResponse =
            decode(ensure_success(response).await?, "addSheet reply").await?;

        update
            .replies
            .into_iter()
            .find_map(|reply| reply.add_sheet)
            .map(|entry| entry.properties)
            .ok_or_else(|| SheetsError::Decode("addSheet reply carried no properties".to_owned()))
    }

    pub async fn values(
        &self,
        token: &AccessToken,
        range: &str,
    ) -> Result<Vec<Vec<Value>>, SheetsError> {
        let url = self.endpoint(&[&self.spreadsheet_id, "values", range]);

        let response = self.http.get(url).bearer_auth(token.bearer()).send().await?;
        let range: ValueRange = decode(ensure_success(response).await?, "value range").await?;
        Ok(range.values)
    }

    pub async fn update_values(
        &self,
        token: &AccessToken,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError> {
        let mut url = self.endpoint(&[&self.spreadsheet_id, "values", range]);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = ValueRangeBody { range, major_dimension: "ROWS", values: rows };

        let response = self.http.put(url).bearer_auth(token.bearer()).json(&body).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn append_values(
        &self,
        token: &AccessToken,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError> {
        let mut url = self.endpoint(&[&self.spreadsheet_id, "values", &format!("{range}:append")]);
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = ValueRangeBody { range, major_dimension: "ROWS", values: rows };

        let response = self.http.post(url).bearer_auth(token.bearer()).json(&body).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["v4", "spreadsheets"]).extend(segments);
        }
        url
    }
}

/// A1 notation for `cells` on the sheet called `title`. Titles are always
/// quoted so spaces and punctuation survive; embedded quotes are doubled.
pub fn a1_range(title: &str, cells: &str) -> String {
    format!("'{}'!{cells}", title.replace('\'', "''"))
}

/// Rows below the header row. A sheet with only a header, or nothing at all,
/// has zero data rows.
pub fn data_row_count(values: &[Vec<Value>]) -> usize {
    values.len().saturating_sub(1)
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response, SheetsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SheetsError::Api { status: status.as_u16(), body })
}

async fn decode<T>(response: Response, what: &str) -> Result<T, SheetsError>
where
    T: serde::de::DeserializeOwned,
{
    response.json::<T>().await.map_err(|error| SheetsError::Decode(format!("{what}: {error}")))
}
