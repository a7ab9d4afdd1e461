// src/services/threat.rs

//! URL reputation gate.
//!
//! Every URL coming from pipeline input passes through [`ThreatGate`] before
//! any fetch or capture. An unconfigured lookup fails open; a lookup that
//! errors is reported to the caller, which applies its own policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{GateDecision, SafeBrowsingConfig, ThreatCheckResult};
use crate::utils::is_http_url;

pub const MISSING_URL: &str = "You must specify the url";
pub const INVALID_URL: &str = "The specified url is not valid";
pub const UNSAFE_URL: &str = "The specified url is not safe.";

/// External reputation service.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn check(&self, url: &str) -> Result<ThreatCheckResult>;
}

/// Validates URLs and consults the reputation service.
#[derive(Clone)]
pub struct ThreatGate {
    lookup: Option<Arc<dyn ReputationLookup>>,
}

impl ThreatGate {
    pub fn new(lookup: Arc<dyn ReputationLookup>) -> Self {
        Self {
            lookup: Some(lookup),
        }
    }

    /// A gate with no reputation service; every valid URL is allowed.
    pub fn unconfigured() -> Self {
        Self { lookup: None }
    }

    /// Build the gate from configuration. A blank API key disables the lookup.
    pub fn from_config(client: reqwest::Client, config: &SafeBrowsingConfig) -> Self {
        match SafeBrowsingClient::from_config(client, config) {
            Some(lookup) => Self::new(Arc::new(lookup)),
            None => {
                log::warn!("Safe Browsing API key not configured; URL reputation checks are disabled");
                Self::unconfigured()
            }
        }
    }

    /// Raw reputation verdict for a URL.
    pub async fn check(&self, url: &str) -> Result<ThreatCheckResult> {
        match &self.lookup {
            Some(lookup) => lookup.check(url).await,
            None => Ok(ThreatCheckResult::safe()),
        }
    }

    /// Validate the URL and turn the verdict into a typed decision.
    ///
    /// Lookup transport failures are returned as errors, not verdicts.
    pub async fn evaluate(&self, url: &str) -> Result<GateDecision> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(GateDecision::blocked(MISSING_URL, Vec::new()));
        }
        if !is_http_url(url) {
            return Ok(GateDecision::blocked(INVALID_URL, Vec::new()));
        }

        let verdict = self.check(url).await?;
        if verdict.has_threat {
            return Ok(GateDecision::blocked(
                UNSAFE_URL,
                verdict.threats.into_iter().collect(),
            ));
        }

        Ok(GateDecision::Allowed {
            url: url.to_string(),
        })
    }
}

/// Google Safe Browsing v4 `threatMatches:find` client.
pub struct SafeBrowsingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    client_id: String,
    client_version: String,
    threat_types: Vec<String>,
    platform_types: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindRequest<'a> {
    client: ClientInfo<'a>,
    threat_info: ThreatInfo<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    client_id: &'a str,
    client_version: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: &'a [String],
    platform_types: &'a [String],
    threat_entry_types: [&'a str; 1],
    threat_entries: [ThreatEntry<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ThreatEntry<'a> {
    url: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct FindResponse {
    #[serde(default)]
    matches: Vec<ThreatMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreatMatch {
    threat_type: String,
}

impl SafeBrowsingClient {
    /// Returns `None` when no API key is configured.
    pub fn from_config(client: reqwest::Client, config: &SafeBrowsingConfig) -> Option<Self> {
        let api_key = config.api_key()?.to_string();
        Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            client_id: config.client_id.clone(),
            client_version: config.client_version.clone(),
            threat_types: config.threat_types.clone(),
            platform_types: config.platform_types.clone(),
        })
    }

    fn request_body<'a>(&'a self, url: &'a str) -> FindRequest<'a> {
        FindRequest {
            client: ClientInfo {
                client_id: &self.client_id,
                client_version: &self.client_version,
            },
            threat_info: ThreatInfo {
                threat_types: &self.threat_types,
                platform_types: &self.platform_types,
                threat_entry_types: ["URL"],
                threat_entries: [ThreatEntry { url }],
            },
        }
    }

    fn parse_response(body: &str) -> Result<ThreatCheckResult> {
        if body.trim().is_empty() {
            return Ok(ThreatCheckResult::safe());
        }
        let response: FindResponse = serde_json::from_str(body)?;
        Ok(ThreatCheckResult::from_threats(
            response.matches.into_iter().map(|m| m.threat_type),
        ))
    }
}

#[async_trait]
impl ReputationLookup for SafeBrowsingClient {
    async fn check(&self, url: &str) -> Result<ThreatCheckResult> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.request_body(url))
            .send()
            .await
            .map_err(|e| AppError::threat_lookup(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::threat_lookup(
                url,
                format!("HTTP status {}", status),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::threat_lookup(url, e))?;

        Self::parse_response(&body).map_err(|e| AppError::threat_lookup(url, e))
    }
}
