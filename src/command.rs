//! Control-plane commands and their mapping onto ARI REST requests

use crate::{
    constants::{ARI_PATH_PREFIX, DIGIT_DETECTION_VARIABLE},
    error::{AriError, AriResult},
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Characters escaped in a path segment. Keeps ids like `1700000000.42` readable.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn validate_identifier(s: &str, field: &'static str) -> AriResult<()> {
    if s.is_empty() {
        return Err(AriError::invalid(field, "must not be empty"));
    }
    if s.chars()
        .any(char::is_control)
    {
        return Err(AriError::invalid(field, "must not contain control characters"));
    }
    Ok(())
}

fn segment(s: &str) -> String {
    utf8_percent_encode(s, SEGMENT).to_string()
}

/// Which operation a [`ControlCommand`] performs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandKind {
    /// Answer the channel.
    Answer,
    /// Start playback of a media URI (`sound:…`, `recording:…`).
    Play { media: String },
    /// Start a bounded-duration recording stored as `name`.
    Record {
        name: String,
        max_duration: Duration,
        format: String,
    },
    /// Stop the live recording `name`.
    StopRecording { name: String },
    /// Enable inbound digit reporting.
    StartDigitDetection,
    /// Disable inbound digit reporting.
    StopDigitDetection,
    /// Terminate the channel.
    Hangup,
    /// Fetch the channel snapshot.
    GetInfo,
}

/// A request to change (or read) the state of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    channel_id: String,
    kind: CommandKind,
}

impl ControlCommand {
    pub fn new(channel_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            channel_id: channel_id.into(),
            kind,
        }
    }

    pub fn answer(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::Answer)
    }

    pub fn play(channel_id: impl Into<String>, media: impl Into<String>) -> Self {
        Self::new(
            channel_id,
            CommandKind::Play {
                media: media.into(),
            },
        )
    }

    pub fn record(
        channel_id: impl Into<String>,
        name: impl Into<String>,
        max_duration: Duration,
        format: impl Into<String>,
    ) -> Self {
        Self::new(
            channel_id,
            CommandKind::Record {
                name: name.into(),
                max_duration,
                format: format.into(),
            },
        )
    }

    pub fn stop_recording(channel_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::StopRecording { name: name.into() })
    }

    pub fn start_digit_detection(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::StartDigitDetection)
    }

    pub fn stop_digit_detection(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::StopDigitDetection)
    }

    pub fn hangup(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::Hangup)
    }

    pub fn get_info(channel_id: impl Into<String>) -> Self {
        Self::new(channel_id, CommandKind::GetInfo)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Short operation name used in logs and errors.
    pub fn operation(&self) -> &'static str {
        match self.kind {
            CommandKind::Answer => "answer",
            CommandKind::Play { .. } => "play",
            CommandKind::Record { .. } => "record",
            CommandKind::StopRecording { .. } => "stop_recording",
            CommandKind::StartDigitDetection => "start_digit_detection",
            CommandKind::StopDigitDetection => "stop_digit_detection",
            CommandKind::Hangup => "hangup",
            CommandKind::GetInfo => "get_info",
        }
    }

    /// Whether a successful response carries a payload worth decoding.
    pub fn returns_payload(&self) -> bool {
        matches!(self.kind, CommandKind::GetInfo)
    }

    /// Validate user-supplied fields, then build the REST request.
    pub fn to_request(&self) -> AriResult<AriRequest> {
        validate_identifier(&self.channel_id, "channel id")?;
        let channel = format!("{}/channels/{}", ARI_PATH_PREFIX, segment(&self.channel_id));

        let request = match &self.kind {
            CommandKind::Answer => AriRequest::new(Method::POST, format!("{}/answer", channel)),
            CommandKind::Play { media } => {
                validate_identifier(media, "media")?;
                AriRequest::new(Method::POST, format!("{}/play", channel))
                    .with_json(json!({ "media": media }))
            }
            CommandKind::Record {
                name,
                max_duration,
                format,
            } => {
                validate_identifier(name, "recording name")?;
                validate_identifier(format, "recording format")?;
                AriRequest::new(Method::POST, format!("{}/record", channel))
                    .with_query("name", name)
                    .with_query("format", format)
                    .with_query("maxDurationSeconds", max_duration_seconds(*max_duration))
                    .with_query("ifExists", "overwrite")
            }
            CommandKind::StopRecording { name } => {
                validate_identifier(name, "recording name")?;
                AriRequest::new(
                    Method::POST,
                    format!("{}/recordings/live/{}/stop", ARI_PATH_PREFIX, segment(name)),
                )
            }
            CommandKind::StartDigitDetection => {
                AriRequest::new(Method::POST, format!("{}/variable", channel))
                    .with_query("variable", DIGIT_DETECTION_VARIABLE)
                    .with_query("value", "on")
            }
            CommandKind::StopDigitDetection => {
                AriRequest::new(Method::POST, format!("{}/variable", channel))
                    .with_query("variable", DIGIT_DETECTION_VARIABLE)
                    .with_query("value", "off")
            }
            CommandKind::Hangup => AriRequest::new(Method::DELETE, channel),
            CommandKind::GetInfo => AriRequest::new(Method::GET, channel),
        };
        Ok(request)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation(), self.channel_id)
    }
}

/// ARI takes whole seconds; round sub-second caps up so a cap is never zero.
fn max_duration_seconds(d: Duration) -> String {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
        .to_string()
}

/// One REST call against the control plane, relative to the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct AriRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
}

impl AriRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            json: None,
        }
    }

    fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query
            .push((key.to_string(), value.into()));
        self
    }

    fn with_json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    /// Look up a query parameter by name.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Action commands carry no payload.
    Empty,
    /// Read commands return the decoded JSON body.
    Json(Value),
}

impl CommandOutput {
    pub fn into_json(self) -> Option<Value> {
        match self {
            CommandOutput::Empty => None,
            CommandOutput::Json(v) => Some(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_request() {
        let req = ControlCommand::answer("1700000000.42")
            .to_request()
            .unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/ari/channels/1700000000.42/answer");
        assert!(req
            .query
            .is_empty());
        assert!(req
            .json
            .is_none());
    }

    #[test]
    fn play_uses_json_body() {
        let req = ControlCommand::play("C1", "sound:hello-world")
            .to_request()
            .unwrap();
        assert_eq!(req.path, "/ari/channels/C1/play");
        assert_eq!(req.json, Some(json!({"media": "sound:hello-world"})));
    }

    #[test]
    fn record_uses_query_params() {
        let req = ControlCommand::record("C1", "C1-1700", Duration::from_secs(10), "wav")
            .to_request()
            .unwrap();
        assert_eq!(req.path, "/ari/channels/C1/record");
        assert_eq!(req.query_param("name"), Some("C1-1700"));
        assert_eq!(req.query_param("format"), Some("wav"));
        assert_eq!(req.query_param("maxDurationSeconds"), Some("10"));
        assert_eq!(req.query_param("ifExists"), Some("overwrite"));
    }

    #[test]
    fn record_duration_rounds_up() {
        assert_eq!(max_duration_seconds(Duration::from_millis(1500)), "2");
        assert_eq!(max_duration_seconds(Duration::from_millis(10)), "1");
        assert_eq!(max_duration_seconds(Duration::ZERO), "1");
    }

    #[test]
    fn digit_detection_toggles_variable() {
        let on = ControlCommand::start_digit_detection("C1")
            .to_request()
            .unwrap();
        let off = ControlCommand::stop_digit_detection("C1")
            .to_request()
            .unwrap();
        assert_eq!(on.path, "/ari/channels/C1/variable");
        assert_eq!(on.query_param("variable"), Some(DIGIT_DETECTION_VARIABLE));
        assert_eq!(on.query_param("value"), Some("on"));
        assert_eq!(off.query_param("value"), Some("off"));
    }

    #[test]
    fn hangup_and_info_share_resource() {
        let hangup = ControlCommand::hangup("C1")
            .to_request()
            .unwrap();
        let info = ControlCommand::get_info("C1")
            .to_request()
            .unwrap();
        assert_eq!(hangup.method, Method::DELETE);
        assert_eq!(info.method, Method::GET);
        assert_eq!(hangup.path, info.path);
        assert!(ControlCommand::get_info("C1").returns_payload());
        assert!(!ControlCommand::hangup("C1").returns_payload());
    }

    #[test]
    fn stop_recording_targets_live_recording() {
        let req = ControlCommand::stop_recording("C1", "C1-1700")
            .to_request()
            .unwrap();
        assert_eq!(req.path, "/ari/recordings/live/C1-1700/stop");
    }

    #[test]
    fn path_segments_are_escaped() {
        let req = ControlCommand::answer("a/b c")
            .to_request()
            .unwrap();
        assert_eq!(req.path, "/ari/channels/a%2Fb%20c/answer");
    }

    #[test]
    fn empty_identifiers_rejected() {
        assert!(matches!(
            ControlCommand::answer("").to_request(),
            Err(AriError::InvalidArgument {
                field: "channel id",
                ..
            })
        ));
        assert!(matches!(
            ControlCommand::play("C1", "").to_request(),
            Err(AriError::InvalidArgument { field: "media", .. })
        ));
        assert!(ControlCommand::answer("C1\n")
            .to_request()
            .is_err());
    }

    #[test]
    fn display_names_operation() {
        assert_eq!(ControlCommand::hangup("C9").to_string(), "hangup C9");
    }
}
