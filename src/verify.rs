use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::errors::StoreError;

pub const EMAIL_VERIFY_METHOD: &str = "EmailVerification";
pub const PHONE_VERIFY_METHOD: &str = "PhoneVerification";

/// Contact verification boundary.
///
/// A failed or timed-out channel degrades to "not verified" rather than
/// surfacing an error; the combined result is the logical OR of the two
/// channels.
#[async_trait]
pub trait ContactVerificationGateway: Send + Sync {
    async fn verify(&self, email: &str, phone: &str) -> bool;
}

/// Reference client for the data-tool verification service.
///
/// Issues the email and phone checks concurrently; an empty value skips its
/// channel entirely.
pub struct DataToolGateway {
    client: Client,
    base_url: String,
    request_key: String,
}

impl DataToolGateway {
    pub fn new(base_url: String, request_key: String) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(StoreError::from)?;
        Ok(Self {
            client,
            base_url,
            request_key,
        })
    }

    async fn call(&self, method: &str, param: (&str, &str)) -> Option<Value> {
        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[
                ("Method", method),
                ("RequestKey", self.request_key.as_str()),
                param,
                ("OutputFormat", "json"),
            ],
        )
        .ok()?;

        // Redact the request key from logs
        tracing::debug!("Calling verification service: Method={}", method);

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Verification call {} failed: {}", method, e);
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(
                "Verification call {} returned status {}",
                method,
                response.status()
            );
            return None;
        }
        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!("Verification call {} returned invalid JSON: {}", method, e);
                None
            }
        }
    }

    fn first_result(body: &Value) -> Option<&Value> {
        body.get("DtResponse")?.get("Result")?.get(0)
    }

    async fn email_valid(&self, email: &str) -> bool {
        if email.is_empty() {
            return false;
        }
        let Some(body) = self.call(EMAIL_VERIFY_METHOD, ("EmailAddress", email)).await else {
            return false;
        };
        let valid = Self::first_result(&body)
            .and_then(|r| r.get("StatusCode"))
            .and_then(|v| v.as_str())
            .map(|code| code == "0" || code == "1")
            .unwrap_or(false);
        if valid {
            tracing::info!("Email {} is verified", email);
        } else {
            tracing::warn!("Email {} failed verification", email);
        }
        valid
    }

    async fn phone_valid(&self, phone: &str) -> bool {
        if phone.is_empty() {
            return false;
        }
        let Some(body) = self.call(PHONE_VERIFY_METHOD, ("PhoneNumber", phone)).await else {
            return false;
        };
        let valid = Self::first_result(&body)
            .and_then(|r| r.get("IsValid"))
            .and_then(|v| v.as_str())
            .map(|v| v == "True")
            .unwrap_or(false);
        if valid {
            tracing::info!("Phone {} is verified", phone);
        } else {
            tracing::warn!("Phone {} failed verification", phone);
        }
        valid
    }
}

#[async_trait]
impl ContactVerificationGateway for DataToolGateway {
    /// Both channels run concurrently; neither can block or fail the other.
    async fn verify(&self, email: &str, phone: &str) -> bool {
        let (email_valid, phone_valid) = tokio::join!(self.email_valid(email), self.phone_valid(phone));
        email_valid | phone_valid
    }
}
