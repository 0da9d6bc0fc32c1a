//! External collaborators: AI parameter suggestions and license checks.
//!
//! The engine only consumes these services. Responses are validated here
//! before they reach the project model, and every failure degrades to a
//! safe default: a rejected suggestion leaves parameters untouched, an
//! unreachable license service means the free tier.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::SuggestionError;
use crate::params::{EffectKind, GRAPHIC_EQ_BANDS, ParamRange, ParamValue, ParameterSet};
use crate::project::AccessLevel;

const COMPRESSOR_KEYS: [&str; 5] = ["threshold", "knee", "ratio", "attack", "release"];

/// Endpoint path of the suggestion service for `kind`, if it has one.
pub fn suggestion_endpoint(kind: EffectKind) -> Option<&'static str> {
    match kind {
        EffectKind::GraphicEq => Some("/api/ai-eq"),
        EffectKind::Compressor => Some("/api/ai-compressor"),
        _ => None,
    }
}

fn required_keys(kind: EffectKind) -> Result<Vec<&'static str>, SuggestionError> {
    match kind {
        EffectKind::GraphicEq => Ok(GRAPHIC_EQ_BANDS.iter().map(|(key, _)| *key).collect()),
        EffectKind::Compressor => Ok(COMPRESSOR_KEYS.to_vec()),
        other => Err(SuggestionError::UnsupportedEffect(other.id().to_string())),
    }
}

/// The JSON object embedded in a free-form response: everything from the
/// first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Result<&str, SuggestionError> {
    let start = text.find('{').ok_or(SuggestionError::NoJsonObject)?;
    let end = text.rfind('}').ok_or(SuggestionError::NoJsonObject)?;
    if end < start {
        return Err(SuggestionError::NoJsonObject);
    }
    Ok(&text[start..=end])
}

/// Parse and validate a suggestion for `kind`.
///
/// Every required key must be present with a number inside the declared
/// range. Keys the effect does not declare are dropped.
pub fn parse_suggestion(kind: EffectKind, text: &str) -> Result<ParameterSet, SuggestionError> {
    let keys = required_keys(kind)?;
    let json = extract_json_object(text)?;
    let raw: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(json).map_err(|e| SuggestionError::Unparseable(e.to_string()))?;

    let descriptor = kind.descriptor();
    let mut map = BTreeMap::new();
    for key in keys {
        let value = raw
            .get(key)
            .ok_or_else(|| SuggestionError::MissingKey(key.to_string()))?;
        let Some(value) = value.as_f64() else {
            return Err(SuggestionError::Unparseable(format!("{key} is not a number")));
        };
        if let Some(ParamRange::Number { min, max, .. }) = descriptor.param(key).map(|s| s.range) {
            if !(value >= min && value <= max) {
                return Err(SuggestionError::OutOfRange {
                    key: key.to_string(),
                    value,
                    min,
                    max,
                });
            }
        }
        map.insert(key.to_string(), ParamValue::Number(value));
    }
    for extra in raw.keys().filter(|k| !map.contains_key(k.as_str())) {
        log::warn!("ignoring unexpected suggestion key {extra} for {kind}");
    }
    Ok(ParameterSet::Flat(map))
}

/// Apply a validated suggestion over existing parameters. Keys absent from
/// the suggestion keep their current value.
pub fn merge_suggestion(current: &ParameterSet, suggestion: &ParameterSet) -> ParameterSet {
    match (current, suggestion) {
        (ParameterSet::Flat(current), ParameterSet::Flat(new)) => {
            let mut merged = current.clone();
            merged.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
            ParameterSet::Flat(merged)
        }
        _ => current.clone(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LicenseResponse {
    access_level: String,
}

/// Access level from a license service response body. Anything
/// unrecognized means the free tier.
pub fn parse_access_level(body: &str) -> AccessLevel {
    match serde_json::from_str::<LicenseResponse>(body) {
        Ok(response) if response.access_level == "producer" => AccessLevel::Producer,
        Ok(response) => {
            if response.access_level != "free" {
                log::warn!("unknown access level {}, using free", response.access_level);
            }
            AccessLevel::Free
        }
        Err(e) => {
            log::warn!("unreadable license response ({e}), using free");
            AccessLevel::Free
        }
    }
}

/// HTTP clients for the suggestion and license services.
#[cfg(feature = "services")]
pub mod http {
    use serde_json::json;

    use super::*;

    pub struct ServiceClient {
        base_url: String,
        client: reqwest::Client,
    }

    impl ServiceClient {
        pub fn new(base_url: impl Into<String>) -> Self {
            ServiceClient {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client: reqwest::Client::new(),
            }
        }

        /// Client for the configured service, if one is configured.
        pub fn from_config(config: &crate::config::EngineConfig) -> Option<Self> {
            config.service_base_url.as_deref().map(Self::new)
        }

        /// Ask for parameters matching `prompt`.
        pub async fn suggest_parameters(
            &self,
            kind: EffectKind,
            prompt: &str,
        ) -> Result<ParameterSet, SuggestionError> {
            let path = suggestion_endpoint(kind)
                .ok_or_else(|| SuggestionError::UnsupportedEffect(kind.id().to_string()))?;
            let response = self
                .client
                .post(format!("{}{path}", self.base_url))
                .json(&json!({ "prompt": prompt }))
                .send()
                .await
                .map_err(|e| SuggestionError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(SuggestionError::Transport(format!("status {}", response.status())));
            }
            let text = response
                .text()
                .await
                .map_err(|e| SuggestionError::Transport(e.to_string()))?;
            parse_suggestion(kind, &text)
        }

        /// Access level of `email`. Never fails: any error means free.
        pub async fn check_access_level(&self, email: Option<&str>) -> AccessLevel {
            let Some(email) = email.filter(|e| !e.is_empty()) else {
                return AccessLevel::Free;
            };
            let request = self
                .client
                .post(format!("{}/verificar-assinatura", self.base_url))
                .json(&json!({ "userEmail": email }))
                .send()
                .await;
            let response = match request {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    log::warn!("license service answered {}, using free", r.status());
                    return AccessLevel::Free;
                }
                Err(e) => {
                    log::warn!("license service unreachable ({e}), using free");
                    return AccessLevel::Free;
                }
            };
            match response.text().await {
                Ok(body) => parse_access_level(&body),
                Err(e) => {
                    log::warn!("license response unreadable ({e}), using free");
                    AccessLevel::Free
                }
            }
        }
    }
}
