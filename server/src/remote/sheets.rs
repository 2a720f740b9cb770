//! Google Sheets v4 REST client.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{header::RETRY_AFTER, Method, RequestBuilder, Response, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value as Json};
use sheetsync_engine::Position;
use std::sync::Arc;
use std::time::Duration;

use super::{Cells, RemoteError, RemoteStore, WriteConfirmation};
use crate::credentials::CredentialProvider;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// One spreadsheet, accessed over the Sheets REST API.
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    credentials: Arc<dyn CredentialProvider>,
    /// Sheet title to numeric sheet id, needed by structural requests
    sheet_ids: DashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Json>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateValuesResponse {
    #[serde(default)]
    updated_range: Option<String>,
    #[serde(default)]
    updated_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AppendValuesResponse {
    updates: UpdateValuesResponse,
}

#[derive(Debug, Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl SheetsClient {
    pub fn new(
        http: reqwest::Client,
        spreadsheet_id: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: SHEETS_API_BASE.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            credentials,
            sheet_ids: DashMap::new(),
        }
    }

    /// Point the client at another API root, e.g. a local emulator.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Rejected(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected("base url cannot have a path".into()))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    /// URL of an action on the spreadsheet itself, like `:batchUpdate`.
    fn action_url(&self, action: &str) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Rejected(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected("base url cannot have a path".into()))?
            .pop_if_empty()
            .push(&format!("{}:{}", self.spreadsheet_id, action));
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, RemoteError> {
        let token = self.credentials.token().await?;
        Ok(self.http.request(method, url).bearer_auth(token.value))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Protocol(e.to_string()))
    }

    async fn spreadsheet(&self) -> Result<Spreadsheet, RemoteError> {
        let mut url = self.url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let sheet: Spreadsheet = self.send(self.request(Method::GET, url).await?).await?;
        for entry in &sheet.sheets {
            self.sheet_ids
                .insert(entry.properties.title.clone(), entry.properties.sheet_id);
        }
        Ok(sheet)
    }

    async fn sheet_id(&self, sheet: &str) -> Result<i64, RemoteError> {
        if let Some(id) = self.sheet_ids.get(sheet) {
            return Ok(*id);
        }
        self.spreadsheet().await?;
        self.sheet_ids
            .get(sheet)
            .map(|id| *id)
            .ok_or_else(|| RemoteError::NotFound(format!("sheet '{sheet}'")))
    }

    async fn batch_update(&self, requests: Json) -> Result<Json, RemoteError> {
        let url = self.action_url("batchUpdate")?;
        let request = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "requests": requests }));
        self.send(request).await
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Cells>, RemoteError> {
        let mut url = self.url(&["values", range])?;
        url.query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        let values: ValueRange = self.send(self.request(Method::GET, url).await?).await?;
        Ok(values
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }
}

/// A1 notation for a whole sheet.
fn sheet_range(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// A1 notation for rows `first..=last` of a sheet.
fn rows_range(sheet: &str, first: Position, last: Position) -> String {
    format!("{}!{}:{}", sheet_range(sheet), first, last)
}

/// Row number of the first cell of an A1 range like `'People'!A5:C5`.
fn first_row_of(range: &str) -> Option<Position> {
    let cells = range.rsplit_once('!').map_or(range, |(_, cells)| cells);
    let first = cells.split(':').next()?;
    let digits: String = first
        .chars()
        .skip_while(|c| c.is_ascii_alphabetic())
        .collect();
    digits.parse().ok()
}

fn cell_text(value: Json) -> String {
    match value {
        Json::String(s) => s,
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

fn transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Connection(error.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);

    match RemoteError::from_status(status.as_u16(), message) {
        RemoteError::RateLimited { .. } => Err(RemoteError::RateLimited { retry_after }),
        other => Err(other),
    }
}

#[async_trait]
impl RemoteStore for SheetsClient {
    async fn read(&self, sheet: &str) -> Result<Vec<Cells>, RemoteError> {
        self.get_values(&sheet_range(sheet)).await
    }

    async fn read_rows(
        &self,
        sheet: &str,
        first: Position,
        last: Position,
    ) -> Result<Vec<Cells>, RemoteError> {
        self.get_values(&rows_range(sheet, first, last)).await
    }

    async fn write(
        &self,
        sheet: &str,
        start_row: Position,
        rows: Vec<Cells>,
    ) -> Result<WriteConfirmation, RemoteError> {
        let count = rows.len();
        let last = start_row + count.saturating_sub(1) as Position;
        let range = rows_range(sheet, start_row, last);
        let mut url = self.url(&["values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let request = self.request(Method::PUT, url).await?.json(&json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        }));
        let response: UpdateValuesResponse = self.send(request).await?;

        let start_row = response
            .updated_range
            .as_deref()
            .and_then(first_row_of)
            .unwrap_or(start_row);
        Ok(WriteConfirmation {
            start_row,
            rows: response.updated_rows.unwrap_or(count),
        })
    }

    async fn append(&self, sheet: &str, row: Cells) -> Result<Position, RemoteError> {
        let range = format!("{}:append", sheet_range(sheet));
        let mut url = self.url(&["values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let request = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "majorDimension": "ROWS", "values": [row] }));
        let response: AppendValuesResponse = self.send(request).await?;

        response
            .updates
            .updated_range
            .as_deref()
            .and_then(first_row_of)
            .ok_or_else(|| RemoteError::Protocol("append response has no updated range".into()))
    }

    async fn delete_row(&self, sheet: &str, row: Position) -> Result<(), RemoteError> {
        let sheet_id = self.sheet_id(sheet).await?;
        self.batch_update(json!([{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": row - 1,
                    "endIndex": row,
                }
            }
        }]))
        .await?;
        Ok(())
    }

    async fn ensure_sheet(&self, sheet: &str) -> Result<bool, RemoteError> {
        let existing = self.spreadsheet().await?;
        if existing.sheets.iter().any(|s| s.properties.title == sheet) {
            return Ok(false);
        }

        let reply = self
            .batch_update(json!([{ "addSheet": { "properties": { "title": sheet } } }]))
            .await?;
        if let Some(id) = reply["replies"][0]["addSheet"]["properties"]["sheetId"].as_i64() {
            self.sheet_ids.insert(sheet.to_string(), id);
        }
        tracing::info!(sheet, "Created sheet");
        Ok(true)
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .spreadsheet()
            .await?
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }
}
