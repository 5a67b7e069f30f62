//! Channel snapshot types as reported by ARI.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when parsing an unknown channel state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelStateError(pub String);

impl fmt::Display for ParseChannelStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel state: {}", self.0)
    }
}

impl std::error::Error for ParseChannelStateError {}

define_wire_enum! {
    error_type: ParseChannelStateError,
    /// Channel state from the `state` field of an ARI `Channel` object.
    ///
    /// Mirrors Asterisk's `ast_state2str()`, plus `Hangup`, which some
    /// deployments report for a channel that is being torn down.
    pub enum ChannelState {
        Down => "Down",
        Rsrvd => "Rsrvd",
        OffHook => "OffHook",
        Dialing => "Dialing",
        Ring => "Ring",
        Ringing => "Ringing",
        Up => "Up",
        Busy => "Busy",
        DialingOffhook => "Dialing Offhook",
        PreRing => "Pre-ring",
        Unknown => "Unknown",
        Hangup => "Hangup",
    }
}

impl ChannelState {
    /// The far end is gone; no further media commands will succeed.
    pub fn is_hung_up(&self) -> bool {
        matches!(self, ChannelState::Hangup)
    }
}

/// Caller or connected-party identification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
}

/// Snapshot of a channel, as carried by events and returned by `GET /channels/{id}`.
///
/// Only `id` is required; every other field tolerates being absent so that
/// partial objects embedded in events still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<CallerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<CallerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creationtime: Option<String>,
}

impl ChannelInfo {
    /// Minimal snapshot with only an id and a raw state string.
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            state: state.into(),
            caller: None,
            connected: None,
            language: None,
            creationtime: None,
        }
    }

    /// Raw `state` string exactly as received.
    pub fn state_str(&self) -> &str {
        &self.state
    }

    /// Parsed channel state, if recognized.
    pub fn state(&self) -> Option<ChannelState> {
        self.state
            .parse()
            .ok()
    }

    /// Whether the snapshot reports the channel as hung up.
    pub fn is_hung_up(&self) -> bool {
        self.state()
            .is_some_and(|s| s.is_hung_up())
    }
}
