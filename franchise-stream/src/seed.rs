//! Seed collaborator
//!
//! Supplies an initial table before the stream opens. The bundled provider
//! queries Google Places Text Search; every place it returns becomes one
//! entry tagged with the single source `"Google Places"`.

use async_trait::async_trait;
use franchise_common::models::{FranchiseQuery, MasterTable, MergedEntry, SourceSet};
use franchise_common::normalize_phone;
use franchise_common::phone::NO_PHONE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const PLACES_SEARCH_URL: &str = "https://places.googleapis.com/v1/places:searchText";
pub const PLACES_SOURCE: &str = "Google Places";
const PLACES_FIELD_MASK: &str = "places.formattedAddress,places.internationalPhoneNumber";
const NO_ADDRESS: &str = "No address available";

/// Seed collaborator errors
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Seed provider not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Capability producing the initial table for a query
#[async_trait]
pub trait SeedProvider: Send + Sync {
    /// Source label the seed entries carry
    fn source_name(&self) -> &str;

    async fn seed(&self, query: &FranchiseQuery) -> Result<MasterTable, SeedError>;
}

/// Places Text Search tuning
#[derive(Debug, Clone, PartialEq)]
pub struct PlacesOptions {
    pub max_results: u32,
    pub min_rating: f64,
    pub included_type: Option<String>,
    pub timeout: Duration,
}

impl Default for PlacesOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_rating: 3.0,
            included_type: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Google Places Text Search client
pub struct PlacesSeedProvider {
    http_client: reqwest::Client,
    search_url: String,
    api_key: String,
    options: PlacesOptions,
}

impl PlacesSeedProvider {
    pub fn new(api_key: impl Into<String>, options: PlacesOptions) -> Result<Self, SeedError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SeedError::NotConfigured);
        }

        let http_client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| SeedError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            search_url: PLACES_SEARCH_URL.to_string(),
            api_key,
            options,
        })
    }

    /// Override the search endpoint (test servers)
    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    fn request_body(&self, query: &FranchiseQuery) -> SearchTextRequest {
        SearchTextRequest {
            text_query: query.places_text(),
            max_result_count: self.options.max_results,
            min_rating: self.options.min_rating,
            included_type: self.options.included_type.clone(),
            language_code: "en-US",
            region_code: "us",
        }
    }
}

#[async_trait]
impl SeedProvider for PlacesSeedProvider {
    fn source_name(&self) -> &str {
        PLACES_SOURCE
    }

    async fn seed(&self, query: &FranchiseQuery) -> Result<MasterTable, SeedError> {
        let body = self.request_body(query);
        tracing::debug!(text_query = %body.text_query, "Querying Google Places");

        let response = self
            .http_client
            .post(&self.search_url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", PLACES_FIELD_MASK)
            .json(&body)
            .send()
            .await
            .map_err(|e| SeedError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SeedError::Api(status.as_u16(), error_text));
        }

        let results: SearchTextResponse = response
            .json()
            .await
            .map_err(|e| SeedError::Parse(e.to_string()))?;

        let table = results.into_table();
        tracing::info!(places = table.len(), "Google Places seed received");
        Ok(table)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchTextRequest {
    text_query: String,
    max_result_count: u32,
    min_rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    included_type: Option<String>,
    language_code: &'static str,
    region_code: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchTextResponse {
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Place {
    formatted_address: Option<String>,
    international_phone_number: Option<String>,
}

impl SearchTextResponse {
    fn into_table(self) -> MasterTable {
        let entries = self
            .places
            .into_iter()
            .map(|place| {
                let address = place
                    .formatted_address
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| NO_ADDRESS.to_string());
                let phone = place.international_phone_number.unwrap_or_else(|| NO_PHONE.to_string());
                MergedEntry::new(address, normalize_phone(&phone), SourceSet::single(PLACES_SOURCE))
            })
            .collect();
        MasterTable::from_entries(entries)
    }
}
