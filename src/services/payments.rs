//! Payment-intent creation against an external gateway.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::PaymentConfig;

/// What the checkout asks the gateway to collect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub email: String,
    pub metadata: BTreeMap<String, String>,
    /// Sent as the gateway idempotency key when set.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PaymentGatewayError {
    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("payment gateway unreachable: {0}")]
    Transport(String),

    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),

    #[error("amount {0} cannot be charged")]
    InvalidAmount(Decimal),
}

/// Creates and cancels payment intents. Implementations must not retry on
/// their own behalf; callers decide whether a retry is safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGatewayClient: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError>;

    async fn cancel_payment_intent(&self, intent_id: String) -> Result<(), PaymentGatewayError>;
}

/// Converts a decimal amount to minor currency units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentGatewayError> {
    if amount.is_sign_negative() {
        return Err(PaymentGatewayError::InvalidAmount(amount));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(PaymentGatewayError::InvalidAmount(amount))
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntentResponse {
    id: String,
    status: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

/// Stripe PaymentIntents over the REST API.
#[derive(Clone)]
pub struct StripePaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripePaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(config: &PaymentConfig) -> Result<Self, PaymentGatewayError> {
        Self::new(
            config.api_base_url.clone(),
            config.secret_key.clone().unwrap_or_default(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn map_send_error(err: reqwest::Error) -> PaymentGatewayError {
        if err.is_timeout() {
            PaymentGatewayError::Timeout
        } else {
            PaymentGatewayError::Transport(err.to_string())
        }
    }

    async fn rejection(response: reqwest::Response) -> PaymentGatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or(body);
        warn!(status, "Stripe API error: {}", message);
        PaymentGatewayError::Rejected { status, message }
    }
}

#[async_trait]
impl PaymentGatewayClient for StripePaymentGateway {
    #[instrument(skip(self, request), fields(currency = %request.currency))]
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, PaymentGatewayError> {
        let amount = to_minor_units(request.amount)?;

        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("receipt_email".to_string(), request.email.clone()),
        ];
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        let mut builder = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&params);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder.send().await.map_err(Self::map_send_error)?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let intent: StripePaymentIntentResponse = response
            .json()
            .await
            .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))?;

        info!("PaymentIntent created: {}", intent.id);
        Ok(PaymentIntent {
            id: intent.id,
            client_secret: intent.client_secret,
            status: intent.status,
        })
    }

    #[instrument(skip(self))]
    async fn cancel_payment_intent(&self, intent_id: String) -> Result<(), PaymentGatewayError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/payment_intents/{}/cancel",
                self.base_url, intent_id
            ))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        info!("PaymentIntent cancelled: {}", intent_id);
        Ok(())
    }
}
