//! Subject identity and network context resolution

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ResolveError;

/// Opaque identity of whoever the measurement is for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub subject_id: String,
    pub region: String,
}

impl Subject {
    pub fn new(subject_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            region: region.into(),
        }
    }
}

/// Where the measurement ran from, as seen by the edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkContext {
    pub ip: Option<String>,
    /// Country code reported by the edge
    pub location: Option<String>,
    /// Edge data center serving the request
    pub colo: Option<String>,
    pub region: String,
    /// False for the placeholder used when the lookup failed
    pub resolved: bool,
}

impl NetworkContext {
    pub fn placeholder(region: impl Into<String>) -> Self {
        Self {
            ip: None,
            location: None,
            colo: None,
            region: region.into(),
            resolved: false,
        }
    }
}

/// Looks up the caller's network context before measuring
#[async_trait]
pub trait NetworkResolver: Send + Sync {
    async fn resolve(&self, subject: &Subject) -> Result<NetworkContext, ResolveError>;
}

/// Parse a `key=value` per line trace document
pub fn parse_trace(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Resolves through an edge trace endpoint such as `/cdn-cgi/trace`
#[derive(Debug, Clone)]
pub struct TraceResolver {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl TraceResolver {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    async fn fetch(&self) -> Result<String, ResolveError> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[async_trait]
impl NetworkResolver for TraceResolver {
    #[instrument(skip(self, subject), fields(url = %self.url))]
    async fn resolve(&self, subject: &Subject) -> Result<NetworkContext, ResolveError> {
        let body = tokio::time::timeout(self.timeout, self.fetch())
            .await
            .map_err(|_| ResolveError::Timeout(self.timeout))??;

        let mut fields = parse_trace(&body);
        let ip = fields
            .remove("ip")
            .ok_or_else(|| ResolveError::Lookup("trace response has no ip".to_string()))?;

        let context = NetworkContext {
            ip: Some(ip),
            location: fields.remove("loc"),
            colo: fields.remove("colo"),
            region: subject.region.clone(),
            resolved: true,
        };
        debug!(colo = ?context.colo, location = ?context.location, "Resolved network context");
        Ok(context)
    }
}

/// Resolver that performs no I/O
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    context: Option<NetworkContext>,
}

impl StaticResolver {
    pub fn new(context: NetworkContext) -> Self {
        Self {
            context: Some(context),
        }
    }
}

#[async_trait]
impl NetworkResolver for StaticResolver {
    async fn resolve(&self, subject: &Subject) -> Result<NetworkContext, ResolveError> {
        Ok(self
            .context
            .clone()
            .unwrap_or_else(|| NetworkContext::placeholder(&subject.region)))
    }
}
