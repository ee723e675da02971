//! Runtime settings for the stream client
//!
//! Resolves every setting across command line, environment, TOML and
//! compiled defaults, then builds the collaborators the session needs.

use franchise_common::config::{
    resolve_setting, resolve_setting_or, ConfigSource, TomlConfig, DEFAULT_STREAM_URL, ENV_GEMINI_API_KEY,
    ENV_LOG_LEVEL, ENV_PLACES_API_KEY, ENV_STREAM_URL,
};
use franchise_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::merge::{AddressMatcher, GeminiMerger, MergeEngine};
use crate::seed::{PlacesOptions, PlacesSeedProvider, SeedProvider};
use crate::transport::HttpStreamTransport;

/// Values supplied on the command line, if any
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub stream_url: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub stream_url: String,
    pub stream_url_source: ConfigSource,
    pub log_level: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_timeout: Duration,
    pub places_api_key: Option<String>,
    pub places: PlacesOptions,
    pub address_matcher: AddressMatcher,
    pub expected_sources: Vec<String>,
}

impl StreamSettings {
    /// Resolve settings from all tiers
    ///
    /// An unknown address matcher name is a configuration error.
    pub fn resolve(toml: &TomlConfig, cli: &CliOverrides) -> Result<Self> {
        let (stream_url, stream_url_source) = resolve_setting_or(
            "stream_url",
            cli.stream_url.as_deref(),
            ENV_STREAM_URL,
            toml.stream_url.as_deref(),
            DEFAULT_STREAM_URL,
        );
        let (log_level, _) = resolve_setting_or(
            "log_level",
            cli.log_level.as_deref(),
            ENV_LOG_LEVEL,
            Some(toml.logging.level.as_str()),
            "info",
        );

        let gemini_api_key = resolve_setting("gemini_api_key", None, ENV_GEMINI_API_KEY, toml.gemini.api_key.as_deref())
            .map(|(key, _)| key);
        let places_api_key = resolve_setting("places_api_key", None, ENV_PLACES_API_KEY, toml.places.api_key.as_deref())
            .map(|(key, _)| key);

        let address_matcher = match toml.merge.address_matcher.as_deref() {
            Some(name) => name.parse()?,
            None => AddressMatcher::default(),
        };

        let expected_sources = toml
            .sources
            .expected
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            stream_url,
            stream_url_source,
            log_level,
            gemini_api_key,
            gemini_model: toml.gemini.model.clone(),
            gemini_timeout: Duration::from_secs(toml.gemini.timeout_secs),
            places_api_key,
            places: PlacesOptions {
                max_results: toml.places.max_results,
                min_rating: toml.places.min_rating,
                included_type: toml.places.included_type.clone().filter(|t| !t.trim().is_empty()),
                timeout: Duration::from_secs(toml.places.timeout_secs),
            },
            address_matcher,
            expected_sources,
        })
    }

    /// Merge engine with the Gemini collaborator when a key is configured
    pub fn merge_engine(&self) -> MergeEngine {
        let engine = MergeEngine::new(self.address_matcher).with_timeout(self.gemini_timeout);

        let Some(key) = &self.gemini_api_key else {
            info!("Gemini API key not configured, merging with fallback logic only");
            return engine;
        };

        match GeminiMerger::new(key.clone(), self.gemini_model.clone(), self.gemini_timeout) {
            Ok(merger) => engine.with_semantic(Arc::new(merger)),
            Err(e) => {
                warn!("Gemini client unavailable: {} - using fallback logic only", e);
                engine
            }
        }
    }

    /// Places seed provider when a key is configured
    pub fn seed_provider(&self) -> Option<Arc<dyn SeedProvider>> {
        let key = self.places_api_key.as_ref()?;
        match PlacesSeedProvider::new(key.clone(), self.places.clone()) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(e) => {
                warn!("Google Places seed unavailable: {}", e);
                None
            }
        }
    }

    pub fn transport(&self) -> std::result::Result<HttpStreamTransport, crate::transport::TransportError> {
        HttpStreamTransport::new(self.stream_url.clone())
    }
}
