//! Command client: REST transport plus bounded retry

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    channel::ChannelInfo,
    command::{AriRequest, CommandOutput, ControlCommand},
    config::AriConfig,
    error::{AriError, AriResult},
};

/// Basic-auth pair for both the REST API and the event stream.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Authorization` header value.
    pub fn basic_auth_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Connectivity-level failure: no well-formed response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

/// Status and body of a well-formed HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and returns whatever the server answered.
///
/// Implementations must return `Err` only when no response was received;
/// any HTTP status, including 4xx/5xx, is a successful transport round trip,
/// even if the body that follows it cannot be read.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &AriRequest) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport with basic auth and a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        request_timeout: Duration,
    ) -> AriResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AriError::config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url
                .trim_end_matches('/')
                .to_string(),
            credentials,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &AriRequest) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, %url, "[ARI] sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if !request
            .query
            .is_empty()
        {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await?;
        let status = response
            .status()
            .as_u16();
        // A status line means the request was delivered: never Err past here.
        let body = match response
            .text()
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(status, %url, "[ARI] response body unreadable: {}", e);
                String::new()
            }
        };
        Ok(TransportResponse { status, body })
    }
}

/// Attempt budget for connectivity failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Imperative channel operations a call flow depends on.
///
/// Only [`execute`](Self::execute) is required; the rest are thin wrappers.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    async fn execute(&self, command: ControlCommand) -> AriResult<CommandOutput>;

    async fn answer(&self, channel_id: &str) -> AriResult<()> {
        self.execute(ControlCommand::answer(channel_id))
            .await
            .map(|_| ())
    }

    async fn play(&self, channel_id: &str, media: &str) -> AriResult<()> {
        self.execute(ControlCommand::play(channel_id, media))
            .await
            .map(|_| ())
    }

    async fn record(
        &self,
        channel_id: &str,
        name: &str,
        max_duration: Duration,
        format: &str,
    ) -> AriResult<()> {
        self.execute(ControlCommand::record(channel_id, name, max_duration, format))
            .await
            .map(|_| ())
    }

    async fn stop_recording(&self, channel_id: &str, name: &str) -> AriResult<()> {
        self.execute(ControlCommand::stop_recording(channel_id, name))
            .await
            .map(|_| ())
    }

    async fn start_digit_detection(&self, channel_id: &str) -> AriResult<()> {
        self.execute(ControlCommand::start_digit_detection(channel_id))
            .await
            .map(|_| ())
    }

    async fn stop_digit_detection(&self, channel_id: &str) -> AriResult<()> {
        self.execute(ControlCommand::stop_digit_detection(channel_id))
            .await
            .map(|_| ())
    }

    async fn hangup(&self, channel_id: &str) -> AriResult<()> {
        self.execute(ControlCommand::hangup(channel_id))
            .await
            .map(|_| ())
    }

    async fn channel_info(&self, channel_id: &str) -> AriResult<ChannelInfo> {
        let value = self
            .execute(ControlCommand::get_info(channel_id))
            .await?
            .into_json()
            .ok_or_else(|| AriError::decode("channel snapshot", "empty response"))?;
        serde_json::from_value(value).map_err(|e| AriError::decode("channel snapshot", e.to_string()))
    }
}

/// ARI command client.
///
/// Connectivity failures are retried up to [`RetryPolicy::max_attempts`]
/// with a fixed delay. A non-2xx response is returned immediately as
/// [`AriError::RemoteRejected`]: the server saw the command, so repeating it
/// could apply it twice.
#[derive(Debug, Clone)]
pub struct AriClient<T = HttpTransport> {
    transport: T,
    retry: RetryPolicy,
}

impl AriClient<HttpTransport> {
    /// HTTP client for the configured server. Expects an already validated config.
    pub fn from_config(config: &AriConfig) -> AriResult<Self> {
        let transport = HttpTransport::new(
            &config.base_url,
            config.credentials(),
            config.request_timeout(),
        )?;
        Ok(Self::with_transport(transport, config.retry_policy()))
    }
}

impl<T: Transport> AriClient<T> {
    pub fn with_transport(transport: T, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn send_with_retry(&self, command: &ControlCommand) -> AriResult<TransportResponse> {
        let request = command.to_request()?;
        let max_attempts = self
            .retry
            .max_attempts
            .max(1);

        let mut attempt = 1;
        loop {
            match self
                .transport
                .send(&request)
                .await
            {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    error!(
                        command = %command,
                        status = response.status,
                        "[ARI] command rejected: {}",
                        response.body
                    );
                    return Err(AriError::RemoteRejected {
                        operation: command
                            .operation()
                            .to_string(),
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        command = %command,
                        attempt,
                        max_attempts,
                        "[ARI] request failed, retrying in {:?}: {}",
                        self.retry.delay,
                        e
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        command = %command,
                        attempts = attempt,
                        "[ARI] request failed, giving up: {}",
                        e
                    );
                    return Err(AriError::TransportExhausted {
                        operation: command
                            .operation()
                            .to_string(),
                        attempts: attempt,
                        message: e.0,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport> ChannelControl for AriClient<T> {
    async fn execute(&self, command: ControlCommand) -> AriResult<CommandOutput> {
        let response = self
            .send_with_retry(&command)
            .await?;
        info!(command = %command, status = response.status, "[ARI] command ok");

        if !command.returns_payload() {
            return Ok(CommandOutput::Empty);
        }
        serde_json::from_str(&response.body)
            .map(CommandOutput::Json)
            .map_err(|e| AriError::decode("response body", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays a fixed script of transport outcomes and records each request.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        sent: Mutex<Vec<AriRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> usize {
            self.sent
                .lock()
                .len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: &AriRequest) -> Result<TransportResponse, TransportError> {
            self.sent
                .lock()
                .push(request.clone());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("script exhausted".into())))
        }
    }

    fn ok(body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: 204,
            body: body.to_string(),
        })
    }

    fn status(code: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: code,
            body: "{\"message\":\"nope\"}".to_string(),
        })
    }

    fn down() -> Result<TransportResponse, TransportError> {
        Err(TransportError("connection refused".into()))
    }

    fn client(script: Vec<Result<TransportResponse, TransportError>>) -> AriClient<ScriptedTransport> {
        AriClient::with_transport(
            ScriptedTransport::new(script),
            RetryPolicy::new(3, Duration::from_millis(100)),
        )
    }

    fn every_command() -> Vec<ControlCommand> {
        vec![
            ControlCommand::answer("C1"),
            ControlCommand::play("C1", "sound:beep"),
            ControlCommand::record("C1", "r1", Duration::from_secs(10), "wav"),
            ControlCommand::stop_recording("C1", "r1"),
            ControlCommand::start_digit_detection("C1"),
            ControlCommand::stop_digit_detection("C1"),
            ControlCommand::hangup("C1"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt() {
        for command in every_command() {
            let client = client(vec![down(), down(), ok("")]);
            let started = tokio::time::Instant::now();
            let output = client
                .execute(command.clone())
                .await
                .unwrap();
            assert_eq!(output, CommandOutput::Empty, "{}", command);
            assert_eq!(
                client
                    .transport()
                    .attempts(),
                3
            );
            assert!(started.elapsed() >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        for command in every_command() {
            let client = client(vec![down(), down(), down(), ok("")]);
            let err = client
                .execute(command)
                .await
                .unwrap_err();
            match err {
                AriError::TransportExhausted {
                    attempts, message, ..
                } => {
                    assert_eq!(attempts, 3);
                    assert_eq!(message, "connection refused");
                }
                other => panic!("expected TransportExhausted, got {:?}", other),
            }
            assert_eq!(
                client
                    .transport()
                    .attempts(),
                3
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        for command in every_command() {
            let client = client(vec![status(404), ok("")]);
            let started = tokio::time::Instant::now();
            let err = client
                .execute(command)
                .await
                .unwrap_err();
            assert!(matches!(err, AriError::RemoteRejected { status: 404, .. }));
            assert_eq!(
                client
                    .transport()
                    .attempts(),
                1
            );
            assert_eq!(started.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_after_connectivity_failure_stops_retrying() {
        let client = client(vec![down(), status(500), ok("")]);
        let err = client
            .answer("C1")
            .await
            .unwrap_err();
        assert!(matches!(err, AriError::RemoteRejected { status: 500, .. }));
        assert_eq!(
            client
                .transport()
                .attempts(),
            2
        );
    }

    #[tokio::test]
    async fn zero_attempts_still_sends_once() {
        let client = AriClient::with_transport(
            ScriptedTransport::new(vec![down()]),
            RetryPolicy::new(0, Duration::from_millis(1)),
        );
        let err = client
            .hangup("C1")
            .await
            .unwrap_err();
        assert!(matches!(err, AriError::TransportExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn channel_info_decodes_snapshot() {
        let client = client(vec![Ok(TransportResponse {
            status: 200,
            body: r#"{"id":"C1","name":"PJSIP/a","state":"Hangup"}"#.to_string(),
        })]);
        let info = client
            .channel_info("C1")
            .await
            .unwrap();
        assert_eq!(info.id, "C1");
        assert!(info.is_hung_up());
    }

    #[tokio::test]
    async fn channel_info_bad_body_is_decode_error() {
        let client = client(vec![Ok(TransportResponse {
            status: 200,
            body: "<html>".to_string(),
        })]);
        let err = client
            .channel_info("C1")
            .await
            .unwrap_err();
        assert!(matches!(err, AriError::Decode { .. }));
        assert_eq!(
            client
                .transport()
                .attempts(),
            1
        );
    }

    #[tokio::test]
    async fn invalid_command_never_reaches_transport() {
        let client = client(vec![ok("")]);
        let err = client
            .answer("")
            .await
            .unwrap_err();
        assert!(matches!(err, AriError::InvalidArgument { .. }));
        assert_eq!(
            client
                .transport()
                .attempts(),
            0
        );
    }

    #[test]
    fn basic_auth_header_and_redaction() {
        let creds = Credentials::new("asterisk", "secret");
        assert_eq!(creds.basic_auth_header(), "Basic YXN0ZXJpc2s6c2VjcmV0");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("asterisk"));
        assert!(!debug.contains("secret"));
    }
}
