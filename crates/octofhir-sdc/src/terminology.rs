//! Value set expansion.
//!
//! Population only needs one thing from terminology: the list of concepts a
//! value set expands to. [`ExpansionFetcher`] is that contract. This module
//! also ships the fetchers the engine is usually wired with:
//!
//! - [`HttpExpansionFetcher`] calls `ValueSet/$expand` on a FHIR terminology server
//! - [`CachingExpansionFetcher`] keeps successful expansions in memory with a TTL
//! - [`ContainedValueSetFetcher`] answers `#id` references from contained ValueSets
//! - [`NoTerminology`] rejects every request

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TerminologyConfig;
use crate::error::TerminologyError;
use crate::response::Coding;

/// One concept of an expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSetConcept {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ValueSetConcept {
    pub fn to_coding(&self) -> Coding {
        Coding {
            system: self.system.clone(),
            version: self.version.clone(),
            code: Some(self.code.clone()),
            display: self.display.clone(),
        }
    }
}

/// Per-request settings passed to a fetcher.
#[derive(Debug, Clone)]
pub struct ExpansionRequestConfig {
    pub timeout: Duration,
}

impl Default for ExpansionRequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<&TerminologyConfig> for ExpansionRequestConfig {
    fn from(config: &TerminologyConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
        }
    }
}

/// Expands value set references into concepts.
#[async_trait]
pub trait ExpansionFetcher: Send + Sync {
    async fn fetch_expansion(
        &self,
        value_set: &str,
        config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError>;
}

#[async_trait]
impl<T: ExpansionFetcher + ?Sized> ExpansionFetcher for Arc<T> {
    async fn fetch_expansion(
        &self,
        value_set: &str,
        config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
        (**self).fetch_expansion(value_set, config).await
    }
}

/// Fetcher for setups without terminology.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTerminology;

#[async_trait]
impl ExpansionFetcher for NoTerminology {
    async fn fetch_expansion(
        &self,
        _value_set: &str,
        _config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
        Err(TerminologyError::Disabled)
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Flatten `expansion.contains`, including nested `contains`.
pub fn parse_expansion(expansion: &Value) -> Vec<ValueSetConcept> {
    fn collect(entries: &[Value], out: &mut Vec<ValueSetConcept>) {
        for entry in entries {
            if let Some(code) = entry.get("code").and_then(|c| c.as_str()) {
                out.push(ValueSetConcept {
                    code: code.to_string(),
                    system: entry.get("system").and_then(|s| s.as_str()).map(String::from),
                    version: entry.get("version").and_then(|s| s.as_str()).map(String::from),
                    display: entry.get("display").and_then(|d| d.as_str()).map(String::from),
                });
            }
            if let Some(nested) = entry.get("contains").and_then(|c| c.as_array()) {
                collect(nested, out);
            }
        }
    }

    let mut concepts = Vec::new();
    if let Some(contains) = expansion.get("contains").and_then(|c| c.as_array()) {
        collect(contains, &mut concepts);
    }
    concepts
}

/// Explicit `compose.include[].concept` lists. Filters are not evaluated.
fn concepts_from_compose(compose: &Value) -> Vec<ValueSetConcept> {
    let mut concepts = Vec::new();
    let Some(includes) = compose.get("include").and_then(|i| i.as_array()) else {
        return concepts;
    };

    for include in includes {
        let system = include.get("system").and_then(|s| s.as_str()).map(String::from);
        let version = include.get("version").and_then(|s| s.as_str()).map(String::from);
        if let Some(concept_arr) = include.get("concept").and_then(|c| c.as_array()) {
            for concept in concept_arr {
                if let Some(code) = concept.get("code").and_then(|c| c.as_str()) {
                    concepts.push(ValueSetConcept {
                        code: code.to_string(),
                        system: system.clone(),
                        version: version.clone(),
                        display: concept.get("display").and_then(|d| d.as_str()).map(String::from),
                    });
                }
            }
        }
    }
    concepts
}

/// Concepts of a ValueSet resource: its expansion, or else its compose lists.
///
/// # Errors
///
/// Returns `InvalidExpansion` when the resource is not a ValueSet or carries
/// neither an expansion nor enumerated concepts.
pub fn concepts_from_value_set(
    url: &str,
    value_set: &Value,
) -> Result<Vec<ValueSetConcept>, TerminologyError> {
    if value_set.get("resourceType").and_then(|v| v.as_str()) != Some("ValueSet") {
        return Err(TerminologyError::invalid_expansion(url, "not a ValueSet resource"));
    }
    if let Some(expansion) = value_set.get("expansion") {
        return Ok(parse_expansion(expansion));
    }
    if let Some(compose) = value_set.get("compose") {
        let concepts = concepts_from_compose(compose);
        if !concepts.is_empty() {
            return Ok(concepts);
        }
    }
    Err(TerminologyError::invalid_expansion(
        url,
        "no expansion and no enumerated compose concepts",
    ))
}

// ============================================================================
// HTTP
// ============================================================================

/// `GET {server}/ValueSet/$expand?url=...`
#[derive(Debug, Clone)]
pub struct HttpExpansionFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpExpansionFetcher {
    pub fn new(base_url: &str) -> Result<Self, TerminologyError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TerminologyError::HttpClientError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &TerminologyConfig) -> Result<Self, TerminologyError> {
        if !config.enabled {
            return Err(TerminologyError::Disabled);
        }
        Self::new(&config.server_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ExpansionFetcher for HttpExpansionFetcher {
    async fn fetch_expansion(
        &self,
        value_set: &str,
        config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
        let url = format!("{}/ValueSet/$expand", self.base_url);
        debug!(value_set, server = %self.base_url, "Expanding value set");

        let resp = self
            .http
            .get(&url)
            .query(&[("url", value_set)])
            .header("Accept", "application/fhir+json")
            .timeout(config.timeout)
            .send()
            .await
            .map_err(|e| TerminologyError::RemoteError(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TerminologyError::ValueSetNotFound(value_set.to_string()));
        }
        if !status.is_success() {
            return Err(TerminologyError::RemoteError(format!(
                "$expand for {value_set} returned HTTP {status}"
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TerminologyError::invalid_expansion(value_set, e.to_string()))?;
        concepts_from_value_set(value_set, &body)
    }
}

// ============================================================================
// Caching
// ============================================================================

#[derive(Debug, Clone)]
struct CachedExpansion {
    concepts: Vec<ValueSetConcept>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedExpansion {
    fn new(concepts: Vec<ValueSetConcept>, ttl: Duration) -> Self {
        Self {
            concepts,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Keeps successful expansions for `ttl`. Failures are never cached.
pub struct CachingExpansionFetcher<F> {
    inner: F,
    cache: DashMap<String, CachedExpansion>,
    ttl: Duration,
}

impl<F: ExpansionFetcher> CachingExpansionFetcher<F> {
    pub fn new(inner: F, ttl: Duration) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl<F: ExpansionFetcher> ExpansionFetcher for CachingExpansionFetcher<F> {
    async fn fetch_expansion(
        &self,
        value_set: &str,
        config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
        if let Some(cached) = self.cache.get(value_set)
            && !cached.is_expired()
        {
            debug!(value_set, "Expansion cache hit");
            return Ok(cached.concepts.clone());
        }
        self.cache.remove(value_set);

        let concepts = self.inner.fetch_expansion(value_set, config).await?;
        self.cache.insert(
            value_set.to_string(),
            CachedExpansion::new(concepts.clone(), self.ttl),
        );
        Ok(concepts)
    }
}

// ============================================================================
// Contained
// ============================================================================

/// Resolves `#id` references from a Questionnaire's contained ValueSets and
/// passes every other reference to `fallback`.
pub struct ContainedValueSetFetcher {
    contained: Vec<Value>,
    fallback: Arc<dyn ExpansionFetcher>,
}

impl ContainedValueSetFetcher {
    pub fn new(contained: Vec<Value>, fallback: Arc<dyn ExpansionFetcher>) -> Self {
        Self {
            contained: contained
                .into_iter()
                .filter(|r| r.get("resourceType").and_then(|v| v.as_str()) == Some("ValueSet"))
                .collect(),
            fallback,
        }
    }

    fn find(&self, id: &str) -> Option<&Value> {
        self.contained
            .iter()
            .find(|vs| vs.get("id").and_then(|v| v.as_str()) == Some(id))
    }
}

#[async_trait]
impl ExpansionFetcher for ContainedValueSetFetcher {
    async fn fetch_expansion(
        &self,
        value_set: &str,
        config: &ExpansionRequestConfig,
    ) -> Result<Vec<ValueSetConcept>, TerminologyError> {
        match value_set.strip_prefix('#') {
            Some(id) => {
                let resource = self
                    .find(id)
                    .ok_or_else(|| TerminologyError::ValueSetNotFound(value_set.to_string()))?;
                concepts_from_value_set(value_set, resource)
            }
            None => self.fallback.fetch_expansion(value_set, config).await,
        }
    }
}
