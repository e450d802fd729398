//! A model provider for the Google Gemini API.
//!
//! Requests go to `streamGenerateContent` with server-sent events, and the
//! streamed chunks are turned into [`ModelResponseEvent`]s as they arrive.
//!
//! ```no_run
//! use fairweather_gemini_model::{GeminiConfigBuilder, GeminiProvider};
//!
//! let config = GeminiConfigBuilder::with_api_key("<api key>")
//!     .with_model("gemini-2.5-pro")
//!     .build();
//! let provider = GeminiProvider::new(config);
//! ```
//!
//! [`ModelResponseEvent`]: fairweather_model::ModelResponseEvent

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use fairweather_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};
use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};

pub use config::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiConfig, GeminiConfigBuilder,
};
use io::{Chunks, Sse};
use proto::ErrorResponse;
pub use response::GeminiResponse;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Error type for [`GeminiProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Gemini model provider.
///
/// Cloning is cheap, clones share the HTTP connection pool.
#[derive(Clone, Debug)]
pub struct GeminiProvider {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiProvider {
    /// Creates a new `GeminiProvider` with the given configuration.
    #[inline]
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ModelProvider for GeminiProvider {
    type Error = Error;
    type Response = GeminiResponse;

    fn model_id(&self) -> &str {
        self.config.model()
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let body = proto::create_request(req, &self.config);
        let resp_fut = self
            .client
            .post(self.config.stream_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send();
        let model = self.config.model.clone();

        async move {
            debug!("sending request to {model}");
            let resp = resp_fut.await.map_err(|err| {
                Error::new(format!("request failed: {err}"), ErrorKind::Other)
            })?;
            let resp = check_status(resp).await?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_event_stream = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| m.subtype().as_str() == "event-stream")
                .unwrap_or(false);
            if !is_event_stream {
                return Err(Error::new(
                    format!("unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            Ok(GeminiResponse::from_sse(Sse::new(chunks)))
        }
    }
}

/// Turns a non-success status into an [`Error`], using the message of the
/// JSON error body when there is one.
async fn check_status(resp: Response) -> Result<Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let kind = error_kind_for_status(status);
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(status, &body);
    warn!("request rejected: {message}");
    Err(Error::new(message, kind))
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse { error }) => match error.status {
            Some(api_status) => {
                format!("{status} {api_status}: {}", error.message)
            }
            None => format!("{status}: {}", error.message),
        },
        Err(_) => format!("{status}: {body}"),
    }
}

fn error_kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            ErrorKind::RateLimitExceeded
        }
        _ => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_for_status() {
        assert_eq!(
            error_kind_for_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            error_kind_for_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::RateLimitExceeded
        );
        assert_eq!(
            error_kind_for_status(StatusCode::BAD_REQUEST),
            ErrorKind::Other
        );
        assert_eq!(
            error_kind_for_status(StatusCode::UNAUTHORIZED),
            ErrorKind::Other
        );
    }

    #[test]
    fn test_error_message() {
        let body = r#"{
            "error": {
                "code": 429,
                "message": "Quota exceeded for gemini-2.5-pro.",
                "status": "RESOURCE_EXHAUSTED"
            }
        }"#;
        assert_eq!(
            error_message(StatusCode::TOO_MANY_REQUESTS, body),
            "429 Too Many Requests RESOURCE_EXHAUSTED: \
             Quota exceeded for gemini-2.5-pro."
        );

        let body = r#"{"error":{"message":"API key not valid."}}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "400 Bad Request: API key not valid."
        );

        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "<html>upstream</html>"),
            "502 Bad Gateway: <html>upstream</html>"
        );
    }

    #[test]
    fn test_provider_reports_model() {
        let provider = GeminiProvider::new(
            GeminiConfigBuilder::with_api_key("xxx").build(),
        );
        assert_eq!(provider.model_id(), "gemini-2.5-pro");
        assert!(!format!("{provider:?}").contains("xxx"));
    }

    #[test]
    fn test_error_display() {
        let err = Error::new(
            "429 RESOURCE_EXHAUSTED: quota",
            ErrorKind::RateLimitExceeded,
        );
        assert_eq!(
            err.to_string(),
            "rate limit exceeded: 429 RESOURCE_EXHAUSTED: quota"
        );
        assert_eq!(err.message(), "429 RESOURCE_EXHAUSTED: quota");
    }
}
