//! Benefit resolvers — static (from config) and remote (billing HTTP API).

use std::time::Duration;

use async_trait::async_trait;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::BenefitResolver;
use cadence_core::types::Benefit;

/// Fixed benefit list.
#[derive(Debug, Clone, Default)]
pub struct StaticBenefits {
    benefits: Vec<Benefit>,
}

impl StaticBenefits {
    pub fn new(benefits: Vec<Benefit>) -> Self {
        Self { benefits }
    }
}

#[async_trait]
impl BenefitResolver for StaticBenefits {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_benefits(&self) -> Result<Vec<Benefit>> {
        Ok(self.benefits.clone())
    }
}

/// Fetches `GET {url}` returning a JSON array of benefits.
pub struct HttpBenefits {
    client: reqwest::Client,
    url: String,
}

impl HttpBenefits {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(CadenceError::Config("benefits.url is required for http source".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CadenceError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl BenefitResolver for HttpBenefits {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_benefits(&self) -> Result<Vec<Benefit>> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CadenceError::Benefits(format!("GET {}: {e}", self.url)))?;

        if !resp.status().is_success() {
            return Err(CadenceError::Benefits(format!(
                "GET {} returned {}",
                self.url,
                resp.status()
            )));
        }

        let benefits: Vec<Benefit> = resp
            .json()
            .await
            .map_err(|e| CadenceError::Benefits(format!("decode benefits: {e}")))?;
        tracing::debug!("💳 Resolved {} benefit(s) from {}", benefits.len(), self.url);
        Ok(benefits)
    }
}
