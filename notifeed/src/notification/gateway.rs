//! Push gateway abstraction and the FCM HTTP v1 implementation.
//!
//! The dispatcher only depends on [`PushGateway`] and the two-class failure
//! taxonomy in [`FailureClass`]; wire formats stay inside this module.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::events::PushMessage;
use crate::config::{env_parse, env_string};
use crate::{Error, Result};

/// Largest batch the gateway accepts in one submission.
pub const GATEWAY_BATCH_CEILING: usize = 500;

const DEFAULT_FCM_ENDPOINT: &str = "https://fcm.googleapis.com/";
const DEFAULT_PER_BATCH_CONCURRENCY: usize = 32;

/// How a failed delivery should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The token will never accept pushes again.
    Permanent,
    /// Retrying later may succeed.
    Transient,
}

/// Per-token result of a gateway submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed {
        class: FailureClass,
        reason: String,
        retry_after: Option<Duration>,
    },
}

impl DeliveryOutcome {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Failed {
            class: FailureClass::Transient,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failed {
            class: FailureClass::Permanent,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                class: FailureClass::Permanent,
                ..
            }
        )
    }
}

/// External push gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Submit one batch of at most [`GATEWAY_BATCH_CEILING`] tokens.
    ///
    /// Returns one outcome per token, in input order. `Err` means the batch as a
    /// whole could not be submitted; callers treat every token in it as a
    /// transient failure.
    async fn send_batch(&self, tokens: &[String], message: &PushMessage)
    -> Result<Vec<DeliveryOutcome>>;
}

/// FCM credentials and client tuning.
#[derive(Clone)]
pub struct GatewayConfig {
    pub project_id: String,
    pub access_token: String,
    pub endpoint: Url,
    pub per_batch_concurrency: usize,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("project_id", &self.project_id)
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("per_batch_concurrency", &self.per_batch_concurrency)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GatewayConfig {
    /// Load from the environment.
    ///
    /// Environment variables:
    /// - `FCM_PROJECT_ID` (required)
    /// - `FCM_ACCESS_TOKEN` (required)
    /// - `FCM_ENDPOINT` (default: `https://fcm.googleapis.com/`)
    /// - `PUSH_PER_BATCH_CONCURRENCY` (default: 32)
    /// - `PUSH_GATEWAY_TIMEOUT_SECS` (default: 5)
    pub fn from_env() -> Result<Self> {
        let project_id = env_string("FCM_PROJECT_ID")
            .ok_or_else(|| Error::config("FCM_PROJECT_ID must be set"))?;
        let access_token = env_string("FCM_ACCESS_TOKEN")
            .ok_or_else(|| Error::config("FCM_ACCESS_TOKEN must be set"))?;
        let endpoint_raw =
            env_string("FCM_ENDPOINT").unwrap_or_else(|| DEFAULT_FCM_ENDPOINT.to_string());
        let endpoint = Url::parse(&endpoint_raw)
            .map_err(|e| Error::config(format!("Invalid FCM_ENDPOINT: {}", e)))?;

        Ok(Self {
            project_id,
            access_token,
            endpoint,
            per_batch_concurrency: env_parse(
                "PUSH_PER_BATCH_CONCURRENCY",
                DEFAULT_PER_BATCH_CONCURRENCY,
            )
            .max(1),
            request_timeout: Duration::from_secs(env_parse("PUSH_GATEWAY_TIMEOUT_SECS", 5u64)),
        })
    }

    /// Worst-case time for the gateway to answer a batch of `batch_size` tokens.
    ///
    /// Requests run `per_batch_concurrency` at a time and each is capped at
    /// `request_timeout`; one extra request slot covers connection setup.
    pub fn batch_deadline(&self, batch_size: usize) -> Duration {
        let waves = batch_size.max(1).div_ceil(self.per_batch_concurrency.max(1));
        self.request_timeout * (waves as u32 + 1)
    }

    fn send_url(&self) -> Result<Url> {
        self.endpoint
            .join(&format!("v1/projects/{}/messages:send", self.project_id))
            .map_err(|e| Error::config(format!("Invalid FCM send URL: {}", e)))
    }
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<FcmData<'a>>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmData<'a> {
    link: &'a str,
}

/// Push gateway over the FCM HTTP v1 API.
///
/// HTTP v1 takes one token per request, so a batch is sent as concurrent
/// single-token requests.
pub struct FcmGateway {
    client: reqwest::Client,
    send_url: Url,
    access_token: String,
    per_batch_concurrency: usize,
    request_timeout: Duration,
}

impl FcmGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            send_url: config.send_url()?,
            access_token: config.access_token.clone(),
            per_batch_concurrency: config.per_batch_concurrency.max(1),
            request_timeout: config.request_timeout,
        })
    }

    /// One token, never slower than the request timeout.
    async fn send_capped(&self, token: &str, message: &PushMessage) -> DeliveryOutcome {
        match timeout(self.request_timeout, self.send_one(token, message)).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::transient("request timed out"),
        }
    }

    async fn send_one(&self, token: &str, message: &PushMessage) -> DeliveryOutcome {
        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
                data: message.link.as_deref().map(|link| FcmData { link }),
            },
        };

        let response = match self
            .client
            .post(self.send_url.clone())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::transient(format!("request failed: {}", e)),
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            return DeliveryOutcome::Delivered;
        }

        let retry_after = retry_after_delay(&response);
        let body = response.text().await.unwrap_or_default();
        let outcome = classify_response(status, &body, retry_after);
        debug!(status, outcome = ?outcome, "FCM rejected push");
        outcome
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send_batch(
        &self,
        tokens: &[String],
        message: &PushMessage,
    ) -> Result<Vec<DeliveryOutcome>> {
        if tokens.len() > GATEWAY_BATCH_CEILING {
            return Err(Error::Gateway(format!(
                "batch of {} exceeds ceiling of {}",
                tokens.len(),
                GATEWAY_BATCH_CEILING
            )));
        }

        // Every token gets an outcome, so a slow request only affects itself.
        let requests: Vec<_> = tokens
            .iter()
            .map(|token| self.send_capped(token, message))
            .collect();
        let outcomes: Vec<DeliveryOutcome> = stream::iter(requests)
            .buffered(self.per_batch_concurrency)
            .collect()
            .await;
        Ok(outcomes)
    }
}

/// Map a non-2xx FCM response onto the failure taxonomy.
pub fn classify_response(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> DeliveryOutcome {
    if (200..300).contains(&status) {
        return DeliveryOutcome::Delivered;
    }

    let error_code = fcm_error_code(body);
    let permanent =
        matches!(status, 404 | 410) || error_code.as_deref() == Some("UNREGISTERED");

    let reason = match error_code {
        Some(code) => format!("HTTP {}: {}", status, code),
        None => format!("HTTP {}", status),
    };

    if permanent {
        DeliveryOutcome::permanent(reason)
    } else {
        DeliveryOutcome::Failed {
            class: FailureClass::Transient,
            reason,
            retry_after,
        }
    }
}

#[derive(Deserialize)]
struct FcmErrorBody {
    error: FcmErrorStatus,
}

#[derive(Deserialize)]
struct FcmErrorStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Extract the most specific error code from an FCM error body.
fn fcm_error_code(body: &str) -> Option<String> {
    let parsed: FcmErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error
        .details
        .into_iter()
        .find_map(|d| d.error_code)
        .or(parsed.error.status)
}

fn retry_after_delay(response: &reqwest::Response) -> Option<Duration> {
    let header = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let value = header.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const UNREGISTERED_BODY: &str = r#"{
        "error": {
            "code": 404,
            "status": "NOT_FOUND",
            "details": [{
                "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                "errorCode": "UNREGISTERED"
            }]
        }
    }"#;

    #[rstest]
    #[case(200, "", None)]
    #[case(404, UNREGISTERED_BODY, Some(FailureClass::Permanent))]
    #[case(410, "", Some(FailureClass::Permanent))]
    #[case(400, r#"{"error":{"status":"INVALID_ARGUMENT","details":[{"errorCode":"UNREGISTERED"}]}}"#, Some(FailureClass::Permanent))]
    #[case(429, "", Some(FailureClass::Transient))]
    #[case(500, "oops", Some(FailureClass::Transient))]
    #[case(503, r#"{"error":{"status":"UNAVAILABLE"}}"#, Some(FailureClass::Transient))]
    #[case(401, "", Some(FailureClass::Transient))]
    fn test_classify_response(
        #[case] status: u16,
        #[case] body: &str,
        #[case] expected: Option<FailureClass>,
    ) {
        match (classify_response(status, body, None), expected) {
            (DeliveryOutcome::Delivered, None) => {}
            (DeliveryOutcome::Failed { class, .. }, Some(expected)) => assert_eq!(class, expected),
            (outcome, expected) => panic!("got {:?}, expected {:?}", outcome, expected),
        }
    }

    #[test]
    fn test_transient_keeps_retry_after() {
        let outcome = classify_response(429, "", Some(Duration::from_secs(12)));
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                class: FailureClass::Transient,
                reason: "HTTP 429".to_string(),
                retry_after: Some(Duration::from_secs(12)),
            }
        );
    }

    #[test]
    fn test_error_code_prefers_details() {
        assert_eq!(fcm_error_code(UNREGISTERED_BODY).as_deref(), Some("UNREGISTERED"));
        assert_eq!(fcm_error_code("not json"), None);
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            project_id: "demo".to_string(),
            access_token: "secret".to_string(),
            endpoint: Url::parse("https://fcm.example.test/").unwrap(),
            per_batch_concurrency: 4,
            request_timeout: Duration::from_secs(5),
        }
    }

    #[rstest]
    #[case(1, 10)]
    #[case(4, 10)]
    #[case(5, 15)]
    #[case(500, 630)]
    fn test_batch_deadline_covers_every_wave(#[case] batch_size: usize, #[case] secs: u64) {
        assert_eq!(
            test_config().batch_deadline(batch_size),
            Duration::from_secs(secs)
        );
    }

    #[test]
    fn test_client_builds() {
        assert!(FcmGateway::new(&test_config()).is_ok());
    }

    #[test]
    fn test_send_url() {
        let config = test_config();
        assert_eq!(
            config.send_url().unwrap().as_str(),
            "https://fcm.example.test/v1/projects/demo/messages:send"
        );
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_request_body_shape() {
        let message = PushMessage::new("Bob", "liked your status").with_link("/status");
        let request = FcmRequest {
            message: FcmMessage {
                token: "tok-1",
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
                data: message.link.as_deref().map(|link| FcmData { link }),
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["message"]["token"], "tok-1");
        assert_eq!(json["message"]["notification"]["title"], "Bob");
        assert_eq!(json["message"]["data"]["link"], "/status");

        let plain = PushMessage::new("Hi", "All");
        let request = FcmRequest {
            message: FcmMessage {
                token: "tok-2",
                notification: FcmNotification {
                    title: &plain.title,
                    body: &plain.body,
                },
                data: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["message"].get("data").is_none());
    }
}
