use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::types::{AnswerCallbackQuery, ApiResponse, File, GetFile, GetUpdates, SendMessage, Update};
use super::TransportError;

const API_BASE: &str = "https://api.telegram.org";

/// Timeout for requests that are not long-polls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Headroom on top of the server-side long-poll wait
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw Bot API calls, one method per endpoint the relay uses
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_updates(
        &self,
        offset: Option<i64>,
        wait: Duration,
    ) -> Result<Vec<Update>, TransportError>;

    async fn send_message(&self, request: &SendMessage) -> Result<(), TransportError>;

    async fn answer_callback_query(&self, request: &AnswerCallbackQuery) -> Result<(), TransportError>;

    /// Resolve a file id to its server-side path
    async fn get_file(&self, file_id: &str) -> Result<String, TransportError>;

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Bot API over HTTPS
pub struct HttpBotApi {
    http: reqwest::Client,
    base_url: String,
    file_url: String,
}

impl HttpBotApi {
    pub fn new(token: &str) -> Result<Self, TransportError> {
        Self::with_base(API_BASE, token)
    }

    pub fn with_base(base: &str, token: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .build()?;
        let base = base.trim_end_matches('/');
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", base, token),
            file_url: format!("{}/file/bot{}", base, token),
        })
    }

    async fn call<B, T>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, TransportError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned + Send,
    {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await?;
        into_result(method, status.as_u16(), envelope)
    }
}

/// Unwrap a response envelope, classifying refusals
fn into_result<T>(method: &str, status: u16, envelope: ApiResponse<T>) -> Result<T, TransportError> {
    if envelope.ok {
        if let Some(result) = envelope.result {
            return Ok(result);
        }
    }

    let code = envelope.error_code.unwrap_or(i64::from(status));
    let description = envelope
        .description
        .unwrap_or_else(|| format!("{} returned no result", method));
    debug!("{} failed: {} {}", method, code, description);

    if code == 400 && description.contains("can't parse entities") {
        return Err(TransportError::MarkupRejected(description));
    }
    Err(TransportError::Api { code, description })
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn get_updates(
        &self,
        offset: Option<i64>,
        wait: Duration,
    ) -> Result<Vec<Update>, TransportError> {
        let request = GetUpdates {
            offset,
            timeout: wait.as_secs(),
            allowed_updates: vec!["message", "callback_query"],
        };
        self.call("getUpdates", &request, wait + LONG_POLL_SLACK)
            .await
    }

    async fn send_message(&self, request: &SendMessage) -> Result<(), TransportError> {
        self.call::<_, serde_json::Value>("sendMessage", request, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn answer_callback_query(&self, request: &AnswerCallbackQuery) -> Result<(), TransportError> {
        self.call::<_, bool>("answerCallbackQuery", request, REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn get_file(&self, file_id: &str) -> Result<String, TransportError> {
        let request = GetFile {
            file_id: file_id.to_string(),
        };
        let file: File = self.call("getFile", &request, REQUEST_TIMEOUT).await?;
        file.file_path.ok_or_else(|| TransportError::Api {
            code: 400,
            description: "file is not downloadable".to_string(),
        })
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TransportError> {
        let response = self
            .http
            .get(format!("{}/{}", self.file_url, file_path))
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}
