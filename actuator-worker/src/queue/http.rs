use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Completion, HeartbeatStatus, QueueError, Task, TaskQueue};

/// Added to the long-poll timeout so the server answers before we give up
const POLL_SLACK: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct PollRequest<'a> {
    worker: &'a str,
    timeout_ms: u64,
}

#[derive(Deserialize)]
struct PollResponse {
    token: String,
    payload: Value,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct SuccessRequest<'a> {
    token: &'a str,
    output: &'a Value,
}

#[derive(Serialize)]
struct FailureRequest<'a> {
    token: &'a str,
    error: &'a str,
    cause: &'a str,
}

/// [`TaskQueue`] speaking JSON over HTTP to a queue bridge
#[derive(Debug, Clone)]
pub struct HttpTaskQueue {
    client: Client,
    endpoint: String,
    token: Option<String>,
    worker: String,
}

impl HttpTaskQueue {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        worker: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = Client::builder()
            .user_agent(concat!("actuator-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| QueueError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            worker: worker.into(),
        })
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Response, QueueError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client.post(&url).json(body).timeout(timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| QueueError::Transport(format!("POST {url} failed: {e}")))
    }

    async fn status_error(response: Response) -> QueueError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        QueueError::Status { status, body }
    }

    async fn complete(&self, path: &str, body: &impl Serialize) -> Result<Completion, QueueError> {
        let response = self.post(path, body, REQUEST_TIMEOUT).await?;
        match response.status() {
            StatusCode::GONE => Ok(Completion::Expired),
            status if status.is_success() => Ok(Completion::Accepted),
            _ => Err(Self::status_error(response).await),
        }
    }
}

#[async_trait]
impl TaskQueue for HttpTaskQueue {
    #[instrument(level = "debug", skip(self))]
    async fn get_task(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let body = PollRequest {
            worker: &self.worker,
            timeout_ms: timeout.as_millis() as u64,
        };
        let response = self.post("/tasks/poll", &body, timeout + POLL_SLACK).await?;
        match response.status() {
            StatusCode::NO_CONTENT => {
                debug!("Poll returned no task");
                Ok(None)
            }
            StatusCode::OK => {
                let polled: PollResponse = response
                    .json()
                    .await
                    .map_err(|e| QueueError::Decode(e.to_string()))?;
                Ok(Some(Task::new(polled.token, polled.payload)))
            }
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn send_heartbeat(&self, token: &str) -> Result<HeartbeatStatus, QueueError> {
        let response = self
            .post("/tasks/heartbeat", &TokenRequest { token }, REQUEST_TIMEOUT)
            .await?;
        match response.status() {
            StatusCode::GONE => Ok(HeartbeatStatus::Expired),
            status if status.is_success() => Ok(HeartbeatStatus::Alive),
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn send_success(&self, token: &str, output: &Value) -> Result<Completion, QueueError> {
        self.complete("/tasks/success", &SuccessRequest { token, output })
            .await
    }

    async fn send_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<Completion, QueueError> {
        self.complete("/tasks/failure", &FailureRequest { token, error, cause })
            .await
    }
}
