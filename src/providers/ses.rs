//! Amazon SES provider implementation.
//!
//! This module provides a [`DeliveryProvider`] backed by the SES v2 HTTP API.
//! Every request is signed with AWS Signature Version 4 using the configured
//! access key, secret key and region.
//!
//! # API Usage
//!
//! - `GET /v2/email/account` when opening a session, to verify credentials.
//!   A key that signs correctly but lacks permission for this call is
//!   accepted; only sending needs `ses:SendEmail`.
//! - `POST /v2/email/outbound-emails` once per message

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::sigv4::{self, RequestParts, SigningScope};
use super::{ConnectionError, DeliveryProvider, DeliverySession, OutgoingMessage, SendError};
use crate::config::{CloudConfig, ProviderKind};

const SERVICE: &str = "ses";
const ACCOUNT_PATH: &str = "/v2/email/account";
const SEND_PATH: &str = "/v2/email/outbound-emails";
const CHARSET: &str = "UTF-8";

/// SendEmail request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from_email_address: &'a str,
    destination: Destination<'a>,
    content: EmailContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Destination<'a> {
    to_addresses: [&'a str; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EmailContent<'a> {
    simple: SimpleMessage<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SimpleMessage<'a> {
    subject: Content<'a>,
    body: Body<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Body<'a> {
    text: Content<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Content<'a> {
    data: &'a str,
    charset: &'a str,
}

/// SendEmail response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailResponse {
    message_id: Option<String>,
}

/// Error body returned by the API.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(rename = "__type")]
    error_type: Option<String>,
}

/// How an unsuccessful API response should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiFailure {
    /// The key is unknown or the signature did not verify.
    Credentials,
    /// The key is valid but not allowed to make this call.
    Denied,
    /// Quota or rate limit.
    Throttled,
    /// The request itself was refused.
    Rejected,
    /// Server-side failure.
    Unavailable,
}

fn classify_api_failure(status: StatusCode, error_type: &str) -> ApiFailure {
    match error_type {
        "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "SignatureDoesNotMatch"
        | "InvalidClientTokenId"
        | "IncompleteSignature"
        | "MissingAuthenticationToken" => return ApiFailure::Credentials,
        "AccessDeniedException" | "AccessDenied" => return ApiFailure::Denied,
        "TooManyRequestsException" | "LimitExceededException" | "ThrottlingException"
        | "Throttling" => return ApiFailure::Throttled,
        _ => {}
    }

    if status == StatusCode::UNAUTHORIZED {
        ApiFailure::Credentials
    } else if status == StatusCode::FORBIDDEN {
        ApiFailure::Denied
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiFailure::Throttled
    } else if status.is_server_error() {
        ApiFailure::Unavailable
    } else {
        ApiFailure::Rejected
    }
}

/// A failed API response, reduced to what error mapping needs.
#[derive(Debug)]
struct ApiError {
    kind: ApiFailure,
    detail: String,
}

impl ApiError {
    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let header_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(':').next().unwrap_or(v).to_string());
        let text = response.text().await.unwrap_or_default();
        let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

        let error_type = header_type
            .or(body.error_type)
            .map(|t| t.rsplit('#').next().unwrap_or(&t).to_string())
            .unwrap_or_default();
        let message = body.message.unwrap_or(text);

        Self {
            kind: classify_api_failure(status, &error_type),
            detail: if error_type.is_empty() {
                format!("status {}: {}", status.as_u16(), message)
            } else {
                format!("{} (status {}): {}", error_type, status.as_u16(), message)
            },
        }
    }
}

/// Signing HTTP client bound to one endpoint.
struct SesClient {
    http: reqwest::Client,
    config: CloudConfig,
    base_url: String,
    host: String,
}

impl SesClient {
    fn new(config: CloudConfig, timeout: Duration) -> Result<Self, ConnectionError> {
        let base_url = config.endpoint_url();
        let url = url::Url::parse(&base_url).map_err(|e| {
            ConnectionError::Configuration(format!("invalid endpoint {}: {}", base_url, e))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| {
                ConnectionError::Configuration(format!("endpoint {} has no host", base_url))
            })?
            .to_string();
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Configuration(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            config,
            base_url,
            host,
        })
    }

    /// Signs and sends one request.
    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Vec<u8>,
    ) -> Result<reqwest::Response, RequestError> {
        let scope = SigningScope {
            access_key: self.config.access_key.trim(),
            secret_key: self.config.secret_key.trim(),
            region: self.config.region.trim(),
            service: SERVICE,
        };
        let signed = sigv4::sign(
            &scope,
            &RequestParts {
                method: method.as_str(),
                canonical_uri: path,
                canonical_query: "",
                host: &self.host,
                payload: &payload,
            },
            Utc::now(),
        )
        .map_err(|e| RequestError::Signing(e.to_string()))?;

        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.payload_hash)
            .header("authorization", signed.authorization);
        if !payload.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json").body(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RequestError::Api(ApiError::from_response(response).await))
        }
    }
}

#[derive(Debug)]
enum RequestError {
    Signing(String),
    Network(String),
    Api(ApiError),
}

/// Amazon SES delivery provider.
///
/// # Example
///
/// ```ignore
/// use mailshot::providers::{DeliveryProvider, SesProvider};
///
/// let provider = SesProvider::new(cloud_config, Duration::from_secs(30));
/// let mut session = provider.open().await?;
/// ```
pub struct SesProvider {
    /// API credentials and region.
    config: CloudConfig,
    /// Per-request timeout.
    timeout: Duration,
}

impl SesProvider {
    /// Creates a provider. Credentials are checked by [`open`](DeliveryProvider::open).
    pub fn new(config: CloudConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Returns the API configuration.
    pub fn config(&self) -> &CloudConfig {
        &self.config
    }
}

#[async_trait]
impl DeliveryProvider for SesProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    async fn open(&self) -> Result<Box<dyn DeliverySession>, ConnectionError> {
        let client = SesClient::new(self.config.clone(), self.timeout)?;

        match client.request(Method::GET, ACCOUNT_PATH, Vec::new()).await {
            Ok(_) => {}
            Err(RequestError::Signing(e)) => return Err(ConnectionError::Configuration(e)),
            Err(RequestError::Network(e)) => return Err(ConnectionError::Connection(e)),
            Err(RequestError::Api(e)) if e.kind == ApiFailure::Credentials => {
                return Err(ConnectionError::Authentication(e.detail));
            }
            Err(RequestError::Api(e)) if e.kind == ApiFailure::Denied => {
                tracing::warn!(
                    detail = %e.detail,
                    "SES key may not read account details, continuing"
                );
            }
            Err(RequestError::Api(e)) => return Err(ConnectionError::Connection(e.detail)),
        }

        tracing::info!(
            endpoint = %client.base_url,
            region = %self.config.region,
            "SES session opened"
        );

        Ok(Box::new(SesSession {
            client: Some(client),
        }))
    }
}

/// A verified SES client for one run.
pub struct SesSession {
    client: Option<SesClient>,
}

fn send_request_body(sender: &str, message: &OutgoingMessage) -> Result<Vec<u8>, SendError> {
    let request = SendEmailRequest {
        from_email_address: sender,
        destination: Destination {
            to_addresses: [message.to.as_str()],
        },
        content: EmailContent {
            simple: SimpleMessage {
                subject: Content {
                    data: &message.subject,
                    charset: CHARSET,
                },
                body: Body {
                    text: Content {
                        data: &message.body,
                        charset: CHARSET,
                    },
                },
            },
        },
    };
    serde_json::to_vec(&request).map_err(|e| SendError::Transport(e.to_string()))
}

#[async_trait]
impl DeliverySession for SesSession {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<Option<String>, SendError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| SendError::Transport("session is closed".to_string()))?;
        let payload = send_request_body(client.config.sender_email.trim(), message)?;

        let response = client
            .request(Method::POST, SEND_PATH, payload)
            .await
            .map_err(|e| match e {
                RequestError::Signing(e) | RequestError::Network(e) => SendError::Transport(e),
                RequestError::Api(e) => match e.kind {
                    ApiFailure::Throttled => SendError::Throttled(e.detail),
                    ApiFailure::Unavailable => SendError::Deferred(e.detail),
                    ApiFailure::Credentials | ApiFailure::Denied | ApiFailure::Rejected => {
                        SendError::Rejected(e.detail)
                    }
                },
            })?;

        let body: SendEmailResponse = response
            .json()
            .await
            .map_err(|e| SendError::Transport(format!("unreadable SES response: {}", e)))?;

        tracing::debug!(to = %message.to, message_id = ?body.message_id, "Email sent via SES");
        Ok(body.message_id)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.client.take().is_some() {
            tracing::info!("SES session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Scripted HTTP endpoint answering one request per connection with the
    /// next `(status line, error type, body)` entry. Returns the base URL and
    /// the request lines it received.
    async fn fake_endpoint(
        replies: Vec<(&'static str, &'static str, &'static str)>,
    ) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, error_type, body) in replies {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    request.extend_from_slice(&buf[..n]);
                    if n == 0 || request_complete(&request) {
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&request).to_string();
                seen.push(text.lines().next().unwrap_or("").to_string());

                let mut response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                    status,
                    body.len()
                );
                if !error_type.is_empty() {
                    response.push_str(&format!("x-amzn-errortype: {}:\r\n", error_type));
                }
                response.push_str("\r\n");
                response.push_str(body);
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
            seen
        });

        (base, task)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        request.len() >= head_end + 4 + length
    }

    fn outgoing() -> OutgoingMessage {
        OutgoingMessage {
            to: "john@x.com".to_string(),
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
        }
    }

    fn config(endpoint: Option<&str>) -> CloudConfig {
        CloudConfig {
            access_key: "AKIAFAKE".to_string(),
            secret_key: "secret".to_string(),
            region: "us-east-1".to_string(),
            sender_email: "news@example.com".to_string(),
            endpoint: endpoint.map(str::to_string),
        }
    }

    #[test]
    fn ses_provider_kind() {
        let provider = SesProvider::new(config(None), Duration::from_secs(1));
        assert_eq!(provider.kind(), ProviderKind::Cloud);
        assert_eq!(provider.config().region, "us-east-1");
    }

    #[test]
    fn client_host_includes_custom_port() {
        let client =
            SesClient::new(config(Some("http://127.0.0.1:4566/")), Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.host, "127.0.0.1:4566");
        assert_eq!(client.base_url, "http://127.0.0.1:4566");

        let client = SesClient::new(config(None), Duration::from_secs(1)).unwrap();
        assert_eq!(client.host, "email.us-east-1.amazonaws.com");
    }

    #[test]
    fn client_rejects_unparseable_endpoint() {
        let result = SesClient::new(config(Some("not a url")), Duration::from_secs(1));
        assert!(matches!(result, Err(ConnectionError::Configuration(_))));
    }

    #[test]
    fn classify_known_error_types() {
        assert_eq!(
            classify_api_failure(StatusCode::FORBIDDEN, "InvalidSignatureException"),
            ApiFailure::Credentials
        );
        assert_eq!(
            classify_api_failure(StatusCode::BAD_REQUEST, "UnrecognizedClientException"),
            ApiFailure::Credentials
        );
        assert_eq!(
            classify_api_failure(StatusCode::FORBIDDEN, "AccessDeniedException"),
            ApiFailure::Denied
        );
        assert_eq!(
            classify_api_failure(StatusCode::BAD_REQUEST, "LimitExceededException"),
            ApiFailure::Throttled
        );
        assert_eq!(
            classify_api_failure(StatusCode::BAD_REQUEST, "MessageRejected"),
            ApiFailure::Rejected
        );
        assert_eq!(
            classify_api_failure(StatusCode::BAD_REQUEST, "MailFromDomainNotVerifiedException"),
            ApiFailure::Rejected
        );
    }

    #[test]
    fn classify_falls_back_to_status() {
        assert_eq!(classify_api_failure(StatusCode::UNAUTHORIZED, ""), ApiFailure::Credentials);
        assert_eq!(classify_api_failure(StatusCode::FORBIDDEN, ""), ApiFailure::Denied);
        assert_eq!(
            classify_api_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiFailure::Throttled
        );
        assert_eq!(
            classify_api_failure(StatusCode::SERVICE_UNAVAILABLE, ""),
            ApiFailure::Unavailable
        );
        assert_eq!(classify_api_failure(StatusCode::BAD_REQUEST, ""), ApiFailure::Rejected);
    }

    #[test]
    fn send_body_shape() {
        let message = OutgoingMessage {
            to: "john@x.com".to_string(),
            subject: "Hi John".to_string(),
            body: "Hello John".to_string(),
        };
        let payload = send_request_body("news@example.com", &message).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(json["FromEmailAddress"], "news@example.com");
        assert_eq!(json["Destination"]["ToAddresses"][0], "john@x.com");
        assert_eq!(json["Content"]["Simple"]["Subject"]["Data"], "Hi John");
        assert_eq!(json["Content"]["Simple"]["Body"]["Text"]["Data"], "Hello John");
        assert_eq!(json["Content"]["Simple"]["Body"]["Text"]["Charset"], "UTF-8");
    }

    #[tokio::test]
    async fn open_unreachable_endpoint_is_connection_error() {
        let provider = SesProvider::new(
            config(Some("http://127.0.0.1:9")),
            Duration::from_secs(2),
        );
        let result = provider.open().await;
        assert!(matches!(result, Err(ConnectionError::Connection(_))));
    }

    #[tokio::test]
    async fn closed_session_rejects_sends() {
        let mut session = SesSession { client: None };
        session.close().await.unwrap();
        let result = session
            .send(&OutgoingMessage {
                to: "john@x.com".to_string(),
                subject: "S".to_string(),
                body: "B".to_string(),
            })
            .await;
        assert!(matches!(result, Err(SendError::Transport(_))));
    }

    #[tokio::test]
    async fn send_only_key_opens_and_sends() {
        let (base, endpoint) = fake_endpoint(vec![
            (
                "403 Forbidden",
                "AccessDeniedException",
                r#"{"message":"not authorized to perform: ses:GetAccount"}"#,
            ),
            ("200 OK", "", r#"{"MessageId":"0100-abc"}"#),
        ])
        .await;
        let provider = SesProvider::new(config(Some(&base)), Duration::from_secs(5));

        let mut session = provider.open().await.unwrap();
        let message_id = session.send(&outgoing()).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(message_id.as_deref(), Some("0100-abc"));
        let seen = endpoint.await.unwrap();
        assert!(seen[0].starts_with("GET /v2/email/account"));
        assert!(seen[1].starts_with("POST /v2/email/outbound-emails"));
    }

    #[tokio::test]
    async fn unknown_key_is_authentication_error() {
        let (base, endpoint) = fake_endpoint(vec![(
            "403 Forbidden",
            "UnrecognizedClientException",
            r#"{"message":"The security token included in the request is invalid."}"#,
        )])
        .await;
        let provider = SesProvider::new(config(Some(&base)), Duration::from_secs(5));

        let result = provider.open().await;
        match result {
            Err(ConnectionError::Authentication(detail)) => {
                assert!(detail.contains("UnrecognizedClientException"))
            }
            Err(other) => panic!("expected authentication error, got {:?}", other),
            Ok(_) => panic!("expected authentication error, got a session"),
        }
        endpoint.await.unwrap();
    }

    #[tokio::test]
    async fn denied_send_is_rejected() {
        let (base, endpoint) = fake_endpoint(vec![
            ("200 OK", "", r#"{"SendQuota":{}}"#),
            (
                "403 Forbidden",
                "AccessDeniedException",
                r#"{"message":"not authorized to perform: ses:SendEmail"}"#,
            ),
        ])
        .await;
        let provider = SesProvider::new(config(Some(&base)), Duration::from_secs(5));

        let mut session = provider.open().await.unwrap();
        let result = session.send(&outgoing()).await;
        assert!(matches!(result, Err(SendError::Rejected(_))));
        endpoint.await.unwrap();
    }
}
