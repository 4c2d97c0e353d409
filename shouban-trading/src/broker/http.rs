//! HTTP adapter for the broker gateway sidecar.
//!
//! The gateway exposes `/balance`, `/position`, `/buy`, `/success_orders`
//! and `/filled_orders` behind a static bearer token. Every response is a
//! JSON envelope `{code, data, msg}`. Transport failures and undecodable
//! bodies are retried with exponential backoff up to the configured attempt
//! budget; after that the call fails with `BrokerError::Transport`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{AccountBalance, Broker, BrokerError, OrderAck};
use shouban_common::BrokerConfig;

/// Raw response envelope from the gateway.
#[derive(Debug, Deserialize)]
struct RawResponse {
    /// Discriminator (0 = success)
    code: i64,
    /// Payload
    #[serde(default)]
    data: Option<Value>,
    /// Message
    #[serde(default, alias = "msg")]
    message: Option<String>,
}

/// Coerce a JSON value to f64; the gateway labels amounts as strings or
/// numbers depending on the terminal backend.
fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Pull the available-funds figure (可用金额) out of a balance payload.
fn extract_available(data: Option<&Value>) -> f64 {
    data.and_then(|d| d.get("可用金额"))
        .and_then(value_to_f64)
        .unwrap_or(0.0)
}

/// HTTP broker gateway client.
pub struct HttpBroker {
    /// HTTP client
    client: reqwest::Client,
    /// Gateway base URL without trailing slash
    base_url: String,
    /// Static bearer token
    token: Option<String>,
    /// Attempts per call
    max_retries: u32,
}

impl HttpBroker {
    /// Create from config
    pub fn from_config(config: &BrokerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            max_retries: config.max_retries.max(1),
        }
    }

    /// Issue one gateway call with the bounded retry policy.
    async fn request(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<RawResponse, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            let mut req = self.client.get(&url);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<RawResponse>().await {
                            Ok(raw) => {
                                debug!(url = %url, code = raw.code, "Broker call completed");
                                return Ok(raw);
                            }
                            Err(e) => {
                                last_error = format!("undecodable body: {}", e);
                                warn!(url = %url, attempt, error = %e, "Broker response decode failed");
                            }
                        }
                    } else {
                        last_error = format!("HTTP {}", status);
                        warn!(url = %url, attempt, status = %status, "Broker request rejected by transport");
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(url = %url, attempt, error = %e, "Broker request failed");
                }
            }

            if attempt < self.max_retries {
                let backoff_ms = 1000 * (1 << (attempt - 1)); // Exponential backoff
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(BrokerError::Transport {
            attempts: self.max_retries,
            message: last_error,
        })
    }

    /// Map a non-zero envelope into `BrokerError::Rejected`.
    fn ensure_success(raw: RawResponse) -> Result<RawResponse, BrokerError> {
        if raw.code != 0 {
            return Err(BrokerError::Rejected {
                code: raw.code,
                message: raw.message.unwrap_or_default(),
            });
        }
        Ok(raw)
    }

    /// Fetch an endpoint whose payload is a row list.
    async fn fetch_rows(&self, path: &str) -> Result<Vec<Value>, BrokerError> {
        let raw = Self::ensure_success(self.request(path, &[], None).await?)?;
        Ok(raw
            .data
            .and_then(|d| d.as_array().cloned())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Broker for HttpBroker {
    fn name(&self) -> &'static str {
        "http-gateway"
    }

    async fn balance(&self) -> Result<AccountBalance, BrokerError> {
        let body = json!({"action": "balance"});
        let raw = Self::ensure_success(self.request("/balance", &[], Some(&body)).await?)?;
        Ok(AccountBalance {
            available: extract_available(raw.data.as_ref()),
        })
    }

    async fn position(&self) -> Result<Vec<Value>, BrokerError> {
        self.fetch_rows("/position").await
    }

    async fn buy(&self, code: &str, price: f64, quantity: u64) -> Result<OrderAck, BrokerError> {
        let query = [
            ("stock_no", code.to_string()),
            ("price", price.to_string()),
            ("amount", quantity.to_string()),
        ];
        let raw = self.request("/buy", &query, None).await?;

        Ok(OrderAck {
            code: raw.code,
            message: raw.message,
            data: raw.data,
        })
    }

    async fn success_orders(&self) -> Result<Vec<Value>, BrokerError> {
        self.fetch_rows("/success_orders").await
    }

    async fn filled_orders(&self) -> Result<Vec<Value>, BrokerError> {
        self.fetch_rows("/filled_orders").await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let raw: RawResponse =
            serde_json::from_str(r#"{"code":0,"data":{"可用金额":"12345.67"}}"#).unwrap();
        assert_eq!(raw.code, 0);
        assert_eq!(extract_available(raw.data.as_ref()), 12345.67);

        let raw: RawResponse =
            serde_json::from_str(r#"{"code":1,"msg":"委托失败"}"#).unwrap();
        assert_eq!(raw.code, 1);
        assert_eq!(raw.message.as_deref(), Some("委托失败"));
    }

    #[test]
    fn test_extract_available_variants() {
        let numeric = json!({"可用金额": 5000.5});
        assert_eq!(extract_available(Some(&numeric)), 5000.5);

        let missing = json!({"总资产": 100000});
        assert_eq!(extract_available(Some(&missing)), 0.0);

        assert_eq!(extract_available(None), 0.0);
    }

    #[test]
    fn test_ensure_success() {
        let ok = RawResponse {
            code: 0,
            data: None,
            message: None,
        };
        assert!(HttpBroker::ensure_success(ok).is_ok());

        let rejected = RawResponse {
            code: 2,
            data: None,
            message: Some("token invalid".to_string()),
        };
        let err = HttpBroker::ensure_success(rejected).unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { code: 2, .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_base_url_trimmed() {
        let config = BrokerConfig {
            base_url: "http://10.0.0.1:5000/".to_string(),
            ..Default::default()
        };
        let broker = HttpBroker::from_config(&config);
        assert_eq!(broker.base_url, "http://10.0.0.1:5000");
        assert_eq!(broker.max_retries, 3);
    }

    #[tokio::test]
    #[ignore = "requires a running broker gateway"]
    async fn test_balance_live() {
        let config = BrokerConfig::default();
        let broker = HttpBroker::from_config(&config);
        let balance = broker.balance().await.unwrap();
        assert!(balance.available >= 0.0);
    }
}
