//! Asterisk REST Interface (ARI) call-control client and IVR call flow for Rust
//!
//! This crate drives calls through ARI: it sends imperative channel commands
//! over REST, consumes the WebSocket event stream, and runs a small IVR flow
//! (welcome, language menu, record-and-playback) per call.
//!
//! # Architecture
//!
//! - [`AriClient`] sends [`ControlCommand`]s, retrying connectivity failures
//!   with a fixed delay and never retrying a rejection
//! - [`EventSubscriber`] keeps the event stream open from a background task
//!   and hands events to an [`EventStream`]
//! - [`EventCorrelator`] turns "the next digit on this channel" into an
//!   awaitable, timeout-bounded result
//! - [`CallFlow`] steps a [`CallState`] machine for one call
//! - [`Dispatcher`] ties it together: one stream, one task per call
//! - [`LogSettings`] installs `tracing` output to stdout or a rotating file
//!
//! # Examples
//!
//! ## Running the IVR
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ari_ivr_tokio::{AriClient, AriConfig, Dispatcher, EventStreamConfig, FlowSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ari_ivr_tokio::AriError> {
//!     let config = AriConfig::from_env()?;
//!     config.validate()?;
//!
//!     let client = Arc::new(AriClient::from_config(&config)?);
//!     let shutdown = CancellationToken::new();
//!     let dispatcher = Dispatcher::new(
//!         client,
//!         FlowSettings::from(&config),
//!         EventStreamConfig::from_config(&config)?,
//!         shutdown.clone(),
//!     );
//!     dispatcher.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Sending Commands
//!
//! ```rust,no_run
//! use ari_ivr_tokio::{AriClient, AriConfig, ChannelControl};
//!
//! # async fn example(config: &AriConfig) -> Result<(), ari_ivr_tokio::AriError> {
//! let client = AriClient::from_config(config)?;
//! client.answer("1700000000.42").await?;
//! client.play("1700000000.42", "sound:hello-world").await?;
//! let info = client.channel_info("1700000000.42").await?;
//! println!("channel state: {}", info.state_str());
//! # Ok(())
//! # }
//! ```
//!
//! ## Waiting for a Digit
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ari_ivr_tokio::{AriConfig, EventCorrelator, EventStreamConfig, EventSubscriber};
//!
//! # async fn example(config: &AriConfig) -> Result<(), ari_ivr_tokio::AriError> {
//! let correlator = Arc::new(EventCorrelator::new());
//! let _events = EventSubscriber::new(EventStreamConfig::from_config(config)?, correlator.clone())
//!     .spawn();
//!
//! match correlator.begin_wait("1700000000.42", Duration::from_secs(5)).await? {
//!     Some(event) => println!("pressed {:?}", event.digit()),
//!     None => println!("no input"),
//! }
//! # Ok(())
//! # }
//! ```

#[macro_use]
mod macros;

pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod constants;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod flow;
pub mod logging;

pub use channel::{CallerId, ChannelInfo, ChannelState, ParseChannelStateError};
pub use client::{
    AriClient, ChannelControl, Credentials, HttpTransport, RetryPolicy, Transport,
    TransportError, TransportResponse,
};
pub use command::{AriRequest, CommandKind, CommandOutput, ControlCommand};
pub use config::AriConfig;
pub use connection::{
    ConnectionStatus, DisconnectReason, EventStream, EventStreamConfig, EventSubscriber,
};
pub use correlator::EventCorrelator;
pub use dispatch::Dispatcher;
pub use error::{AriError, AriResult};
pub use event::{AriEventType, EventCategory, InboundEvent, ParseEventTypeError};
pub use flow::{CallContext, CallFlow, CallState, FlowOutcome, FlowSettings, Language, Prompts};
pub use logging::{LogRotation, LogSettings, ParseLogRotationError};
