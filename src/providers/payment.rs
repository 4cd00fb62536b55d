//! Payment gateway collaborator.
//!
//! The engine only ever sees three calls: initialize a checkout, retrieve
//! a result for a callback token, refund a captured payment. A `success`
//! result is what drives PENDING_PAYMENT -> CONFIRMED.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open - payment gateway unavailable")]
    CircuitBreakerOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOrder {
    pub order_code: String,
    pub appointment_id: Uuid,
    pub buyer_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub checkout_form_content: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResult {
    pub status: String,
    pub payment_id: String,
    pub conversation_id: String,
}

impl PaymentResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_payment(&self, order: &CheckoutOrder)
        -> Result<CheckoutSession, GatewayError>;
    async fn retrieve_result(&self, token: &str) -> Result<PaymentResult, GatewayError>;
    async fn refund(&self, payment_id: &str, amount: &BigDecimal) -> Result<(), GatewayError>;
}

/// HTTP client for the hosted checkout gateway.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String) -> Self {
        Self::with_circuit_breaker_config(base_url, 5, Duration::from_secs(60))
    }

    pub fn with_circuit_breaker_config(
        base_url: String,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::exponential(Duration::from_secs(10), reset_timeout);
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpPaymentGateway {
            client,
            base_url,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize_payment(
        &self,
        order: &CheckoutOrder,
    ) -> Result<CheckoutSession, GatewayError> {
        let url = self.url("/checkout/init");
        let client = self.client.clone();
        let body = order.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.post(&url).json(&body).send().await?;
                if !response.status().is_success() {
                    return Err(GatewayError::Rejected(response.status().to_string()));
                }
                let session = response.json::<CheckoutSession>().await?;
                Ok(session)
            })
            .await;

        match result {
            Ok(session) => Ok(session),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn retrieve_result(&self, token: &str) -> Result<PaymentResult, GatewayError> {
        let url = self.url(&format!("/checkout/result/{token}"));
        let client = self.client.clone();
        let token = token.to_string();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.get(&url).send().await?;
                if response.status() == 404 {
                    return Err(GatewayError::InvalidResponse(format!(
                        "unknown checkout token {token}"
                    )));
                }
                let payment = response.json::<PaymentResult>().await?;
                Ok(payment)
            })
            .await;

        match result {
            Ok(payment) => Ok(payment),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn refund(&self, payment_id: &str, amount: &BigDecimal) -> Result<(), GatewayError> {
        let url = self.url("/refunds");
        let client = self.client.clone();
        let body = serde_json::json!({
            "payment_id": payment_id,
            "amount": amount.to_string(),
        });

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.post(&url).json(&body).send().await?;
                if !response.status().is_success() {
                    return Err(GatewayError::Rejected(response.status().to_string()));
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

impl Clone for HttpPaymentGateway {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}
