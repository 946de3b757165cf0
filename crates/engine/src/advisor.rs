use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Action, Candle, Error, Result};
use strategy::{Advisor, IndicatorSnapshot, Opinion};

#[derive(Debug, Serialize)]
struct AdviceRequest<'a> {
    asset: &'a str,
    candles: &'a [Candle],
    indicators: &'a IndicatorSnapshot,
}

#[derive(Debug, Deserialize)]
struct AdviceBody {
    action: String,
    confidence: f64,
}

impl AdviceBody {
    fn into_opinion(self) -> Result<Opinion> {
        let action: Action = self
            .action
            .parse()
            .map_err(|e: Error| Error::Advisory(e.to_string()))?;
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(Error::Advisory(format!(
                "confidence {} outside 0..=100",
                self.confidence
            )));
        }
        Ok(Opinion {
            action,
            confidence: self.confidence,
        })
    }
}

/// Asks an external HTTP service for an opinion. The service receives the
/// recent candles and indicator readings as JSON and answers with
/// `{"action": "CALL"|"PUT"|"WAIT", "confidence": 0..100}`.
pub struct HttpAdvisor {
    client: Client,
    url: String,
}

impl HttpAdvisor {
    /// `timeout` bounds the HTTP exchange; the pipeline applies its own
    /// deadline on top.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn opine(
        &self,
        asset: &str,
        recent: &[Candle],
        indicators: &IndicatorSnapshot,
    ) -> Result<Opinion> {
        let resp = self
            .client
            .post(&self.url)
            .json(&AdviceRequest {
                asset,
                candles: recent,
                indicators,
            })
            .send()
            .await
            .map_err(|e| Error::Advisory(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Advisory(format!("advisor answered {status}")));
        }
        let body: AdviceBody = resp
            .json()
            .await
            .map_err(|e| Error::Advisory(format!("malformed answer: {e}")))?;
        debug!(asset = %asset, action = %body.action, confidence = body.confidence, "Advisor answered");
        body.into_opinion()
    }
}
