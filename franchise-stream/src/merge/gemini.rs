//! Gemini semantic merge client
//!
//! Sends the current table and a batch to the `generateContent` endpoint and
//! reads back an `updatedTable` array. The model is asked for JSON only, but
//! the reply is still scanned for the outermost object since models
//! occasionally wrap it in prose or code fences.

use async_trait::async_trait;
use franchise_common::models::{MasterTable, MergedEntry, SourceSet, SourcedLocation};
use franchise_common::phone::NO_PHONE;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{MergeError, SemanticMerger};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Gemini-backed [`SemanticMerger`]
pub struct GeminiMerger {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiMerger {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, MergeError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MergeError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Point the client at another host (test servers, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl SemanticMerger for GeminiMerger {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn merge_batch(
        &self,
        table: &MasterTable,
        batch: &[SourcedLocation],
    ) -> Result<Vec<MergedEntry>, MergeError> {
        let prompt = build_prompt(table, batch)?;
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        tracing::debug!(model = %self.model, records = batch.len(), "Requesting Gemini merge");

        let response = self
            .http_client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| MergeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MergeError::Api(status.as_u16(), error_text));
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| MergeError::Parse(e.to_string()))?;

        parse_updated_table(&reply.text())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatedTable {
    updated_table: Vec<WireEntry>,
}

/// Entry as the model writes it; tolerant of missing or renamed fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry {
    #[serde(default)]
    address: String,
    #[serde(default, alias = "phone", alias = "phone_number")]
    phone_number: Option<String>,
    #[serde(default)]
    sources: Vec<String>,
}

impl From<WireEntry> for MergedEntry {
    fn from(wire: WireEntry) -> Self {
        MergedEntry::new(
            wire.address,
            wire.phone_number.unwrap_or_else(|| NO_PHONE.to_string()),
            SourceSet::from(wire.sources),
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptRecord<'a> {
    address: &'a str,
    phone_number: &'a str,
    source: &'a str,
}

fn build_prompt(table: &MasterTable, batch: &[SourcedLocation]) -> Result<String, MergeError> {
    let table_json = serde_json::to_string_pretty(table).map_err(|e| MergeError::Parse(e.to_string()))?;
    let records: Vec<PromptRecord<'_>> = batch
        .iter()
        .map(|r| PromptRecord {
            address: &r.address,
            phone_number: &r.phone_number,
            source: &r.source,
        })
        .collect();
    let batch_json = serde_json::to_string_pretty(&records).map_err(|e| MergeError::Parse(e.to_string()))?;

    Ok(format!(
        r#"You merge franchise location listings gathered from several search sources.

Fold the new records into the current table and return the whole updated table.

Rules:
- Two addresses are the same location when they describe the same physical place, even if formatted differently.
- When merging, keep the more complete address and add the record's source to the entry's sources.
- Prefer a real phone number over "N/A". Format phones as "+1 XXX-XXX-XXXX".
- Records that match nothing in the table become new entries. Records in the batch may also duplicate each other.
- Never remove an existing entry or an existing source.

Current table:
{table_json}

New records:
{batch_json}

Reply with JSON only, shaped as:
{{"updatedTable": [{{"address": "...", "phoneNumber": "...", "sources": ["..."]}}]}}"#
    ))
}

/// Extract the `updatedTable` array from the model's text reply
fn parse_updated_table(text: &str) -> Result<Vec<MergedEntry>, MergeError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(MergeError::Parse("no JSON object in model reply".to_string())),
    };

    let parsed: UpdatedTable = serde_json::from_str(json).map_err(|e| MergeError::Parse(e.to_string()))?;
    Ok(parsed.updated_table.into_iter().map(MergedEntry::from).collect())
}
