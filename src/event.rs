//! ARI event types and decoding of inbound event-stream messages

use crate::channel::ChannelInfo;
use crate::error::{AriError, AriResult};
use serde::Deserialize;
use std::fmt;

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventTypeError(pub String);

impl fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}

define_wire_enum! {
    error_type: ParseEventTypeError,
    /// ARI event `type` tags this crate recognizes by name.
    ///
    /// Anything else still decodes; [`InboundEvent::event_type`] is then `None`
    /// and the raw tag is available from [`InboundEvent::type_name`].
    pub enum AriEventType {
        StasisStart => "StasisStart",
        StasisEnd => "StasisEnd",
        ChannelDtmfReceived => "ChannelDtmfReceived",
        ChannelStateChange => "ChannelStateChange",
        ChannelHangupRequest => "ChannelHangupRequest",
        ChannelDestroyed => "ChannelDestroyed",
        ChannelVarset => "ChannelVarset",
        PlaybackStarted => "PlaybackStarted",
        PlaybackFinished => "PlaybackFinished",
        RecordingStarted => "RecordingStarted",
        RecordingFinished => "RecordingFinished",
        RecordingFailed => "RecordingFailed",
    }
}

impl AriEventType {
    /// Dispatch category for this event type.
    pub fn category(&self) -> EventCategory {
        match self {
            AriEventType::StasisStart => EventCategory::CallStarted,
            AriEventType::StasisEnd => EventCategory::CallEnded,
            AriEventType::ChannelDtmfReceived => EventCategory::DigitReceived,
            _ => EventCategory::Ignored,
        }
    }

    /// Events that must carry a `channel` object to be meaningful.
    fn requires_channel(&self) -> bool {
        !matches!(self.category(), EventCategory::Ignored)
    }
}

/// How the dispatch loop treats an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// A channel entered the application.
    CallStarted,
    /// A channel left the application.
    CallEnded,
    /// The caller pressed a key.
    DigitReceived,
    /// Everything else.
    Ignored,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    channel: Option<ChannelInfo>,
    #[serde(default)]
    digit: Option<String>,
    #[serde(default)]
    application: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// A decoded message from the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    event_type: Option<AriEventType>,
    type_name: String,
    channel: Option<ChannelInfo>,
    digit: Option<char>,
    application: Option<String>,
    timestamp: Option<String>,
}

impl InboundEvent {
    /// Decode one text frame from the event stream.
    ///
    /// Rejects frames that are not JSON objects with a `type`, channel-scoped
    /// events without a channel id, and digit events without exactly one digit.
    pub fn from_json(text: &str) -> AriResult<Self> {
        let wire: WireEvent =
            serde_json::from_str(text).map_err(|e| AriError::decode("event", e.to_string()))?;

        let event_type = AriEventType::from_wire(&wire.type_name);

        if let Some(kind) = event_type {
            let has_channel = wire
                .channel
                .as_ref()
                .is_some_and(|c| !c.id.is_empty());
            if kind.requires_channel() && !has_channel {
                return Err(AriError::decode(
                    "event",
                    format!("{} without channel id", wire.type_name),
                ));
            }
        }

        let digit = match (event_type, wire.digit.as_deref()) {
            (Some(AriEventType::ChannelDtmfReceived), Some(d)) => Some(single_char(d)?),
            (Some(AriEventType::ChannelDtmfReceived), None) => {
                return Err(AriError::decode("event", "ChannelDtmfReceived without digit"));
            }
            (_, Some(d)) => single_char(d).ok(),
            (_, None) => None,
        };

        Ok(Self {
            event_type,
            type_name: wire.type_name,
            channel: wire.channel,
            digit,
            application: wire.application,
            timestamp: wire.timestamp,
        })
    }

    /// Channel-started event for `channel_id`.
    pub fn stasis_start(channel_id: impl Into<String>) -> Self {
        Self::for_channel(AriEventType::StasisStart, channel_id)
    }

    /// Channel-ended event for `channel_id`.
    pub fn stasis_end(channel_id: impl Into<String>) -> Self {
        Self::for_channel(AriEventType::StasisEnd, channel_id)
    }

    /// Digit event for `channel_id`.
    pub fn dtmf(channel_id: impl Into<String>, digit: char) -> Self {
        let mut event = Self::for_channel(AriEventType::ChannelDtmfReceived, channel_id);
        event.digit = Some(digit);
        event
    }

    fn for_channel(kind: AriEventType, channel_id: impl Into<String>) -> Self {
        Self {
            event_type: Some(kind),
            type_name: kind
                .as_str()
                .to_string(),
            channel: Some(ChannelInfo::new(channel_id, "")),
            digit: None,
            application: None,
            timestamp: None,
        }
    }

    /// Parsed event type, if recognized.
    pub fn event_type(&self) -> Option<AriEventType> {
        self.event_type
    }

    /// Raw `type` tag.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Dispatch category; unrecognized types are [`EventCategory::Ignored`].
    pub fn category(&self) -> EventCategory {
        self.event_type
            .map(|t| t.category())
            .unwrap_or(EventCategory::Ignored)
    }

    /// Whether this is an event of the given type.
    pub fn is_event_type(&self, event_type: AriEventType) -> bool {
        self.event_type == Some(event_type)
    }

    /// Embedded channel snapshot.
    pub fn channel(&self) -> Option<&ChannelInfo> {
        self.channel
            .as_ref()
    }

    /// `channel.id`, for channel-scoped events.
    pub fn channel_id(&self) -> Option<&str> {
        self.channel
            .as_ref()
            .map(|c| c.id.as_str())
    }

    /// The key pressed, for digit events.
    pub fn digit(&self) -> Option<char> {
        self.digit
    }

    /// Stasis application the event was delivered to.
    pub fn application(&self) -> Option<&str> {
        self.application
            .as_deref()
    }

    /// Server-side timestamp string.
    pub fn timestamp(&self) -> Option<&str> {
        self.timestamp
            .as_deref()
    }
}

fn single_char(s: &str) -> AriResult<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(AriError::decode(
            "event",
            format!("digit must be one character, got {:?}", s),
        )),
    }
}
