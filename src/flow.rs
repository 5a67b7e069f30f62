//! IVR call flow: welcome, language menu, record-and-playback loop
//!
//! The flow is a tagged [`CallState`] advanced by [`CallState::handle`]. Each
//! step issues commands through a [`ChannelControl`] and waits for digits
//! through the shared [`EventCorrelator`]. [`CallFlow::run`] drives the states
//! until one returns no successor.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    client::ChannelControl,
    config::AriConfig,
    constants::{
        ALTERNATE_LANGUAGE_DIGIT, DEFAULT_DIGIT_TIMEOUT, DEFAULT_RECORDING_FORMAT,
        DEFAULT_RECORDING_MAX_DURATION, PROMPT_ALTERNATE_WELCOME, PROMPT_LANGUAGE_MENU,
        PROMPT_WELCOME, RECORDING_MEDIA_SCHEME,
    },
    correlator::EventCorrelator,
    error::{AriError, AriResult},
    event::InboundEvent,
};

/// Media references for each prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub welcome: String,
    pub language_menu: String,
    pub alternate_welcome: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            welcome: PROMPT_WELCOME.to_string(),
            language_menu: PROMPT_LANGUAGE_MENU.to_string(),
            alternate_welcome: PROMPT_ALTERNATE_WELCOME.to_string(),
        }
    }
}

/// Tunables for a call flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    pub digit_timeout: Duration,
    pub recording_max_duration: Duration,
    pub recording_format: String,
    pub alternate_language_digit: char,
    pub prompts: Prompts,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            digit_timeout: DEFAULT_DIGIT_TIMEOUT,
            recording_max_duration: DEFAULT_RECORDING_MAX_DURATION,
            recording_format: DEFAULT_RECORDING_FORMAT.to_string(),
            alternate_language_digit: ALTERNATE_LANGUAGE_DIGIT,
            prompts: Prompts::default(),
        }
    }
}

impl From<&AriConfig> for FlowSettings {
    fn from(config: &AriConfig) -> Self {
        Self {
            digit_timeout: config.digit_timeout(),
            recording_max_duration: config.recording_max_duration(),
            ..Self::default()
        }
    }
}

/// Language chosen at the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Primary,
    Alternate,
}

/// Where a call currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Answer and greet.
    Welcome,
    /// Offer the alternate language.
    LanguageSelection,
    /// Record, play back, repeat until the caller hangs up.
    Record { language: Language, iteration: u32 },
    /// Terminal.
    Hangup,
}

impl CallState {
    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            CallState::Welcome => "welcome",
            CallState::LanguageSelection => "language_selection",
            CallState::Record { .. } => "record",
            CallState::Hangup => "hangup",
        }
    }

    /// Run this state's step and return its successor, or `None` once terminal.
    pub async fn handle<C>(
        self,
        ctx: &CallContext<C>,
        event: &InboundEvent,
    ) -> AriResult<Option<CallState>>
    where
        C: ChannelControl + ?Sized,
    {
        let channel_id = event
            .channel_id()
            .ok_or_else(|| AriError::invalid("event", "call flow event has no channel"))?;

        match self {
            CallState::Welcome => {
                ctx.client
                    .answer(channel_id)
                    .await?;
                ctx.client
                    .play(channel_id, &ctx.settings.prompts.welcome)
                    .await?;
                ctx.client
                    .play(channel_id, &ctx.settings.prompts.language_menu)
                    .await?;
                Ok(Some(CallState::LanguageSelection))
            }
            CallState::LanguageSelection => {
                ctx.client
                    .start_digit_detection(channel_id)
                    .await?;
                let selected = select_language(ctx, channel_id).await;
                let stopped = ctx
                    .client
                    .stop_digit_detection(channel_id)
                    .await;
                let language = selected?;
                stopped?;
                Ok(Some(CallState::Record {
                    language,
                    iteration: 0,
                }))
            }
            CallState::Record {
                language,
                iteration,
            } => {
                let name = recording_name(channel_id, iteration);
                ctx.client
                    .record(
                        channel_id,
                        &name,
                        ctx.settings.recording_max_duration,
                        &ctx.settings.recording_format,
                    )
                    .await?;
                tokio::time::sleep(ctx.settings.recording_max_duration).await;
                ctx.client
                    .play(channel_id, &format!("{}{}", RECORDING_MEDIA_SCHEME, name))
                    .await?;

                let info = ctx
                    .client
                    .channel_info(channel_id)
                    .await?;
                if info.is_hung_up() {
                    Ok(Some(CallState::Hangup))
                } else {
                    debug!(channel_id, state = %info.state_str(), "channel still up, recording again");
                    Ok(Some(CallState::Record {
                        language,
                        iteration: iteration.wrapping_add(1),
                    }))
                }
            }
            CallState::Hangup => {
                info!(channel_id, "call flow finished");
                Ok(None)
            }
        }
    }
}

/// Wait for one digit; the alternate-language digit switches language.
async fn select_language<C>(ctx: &CallContext<C>, channel_id: &str) -> AriResult<Language>
where
    C: ChannelControl + ?Sized,
{
    let event = ctx
        .correlator
        .begin_wait(channel_id, ctx.settings.digit_timeout)
        .await?;

    match event.and_then(|e| e.digit()) {
        Some(digit) if digit == ctx.settings.alternate_language_digit => {
            info!(channel_id, %digit, "alternate language selected");
            ctx.client
                .play(channel_id, &ctx.settings.prompts.alternate_welcome)
                .await?;
            Ok(Language::Alternate)
        }
        Some(digit) => {
            debug!(channel_id, %digit, "continuing in primary language");
            Ok(Language::Primary)
        }
        None => {
            debug!(channel_id, "no digit, continuing in primary language");
            Ok(Language::Primary)
        }
    }
}

/// `{channel}-{unix millis}-{iteration}`, unique per call and loop pass.
fn recording_name(channel_id: &str, iteration: u32) -> String {
    format!(
        "{}-{}-{}",
        channel_id,
        chrono::Utc::now().timestamp_millis(),
        iteration
    )
}

/// Collaborators shared by every state of one call.
pub struct CallContext<C: ?Sized> {
    pub client: Arc<C>,
    pub correlator: Arc<EventCorrelator>,
    pub settings: Arc<FlowSettings>,
}

impl<C: ?Sized> Clone for CallContext<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            correlator: self.correlator.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// How a call flow ended.
#[derive(Debug)]
pub enum FlowOutcome {
    /// A terminal state was reached.
    Completed,
    /// A step failed; the call was left as is.
    Abandoned { state: CallState, error: AriError },
}

impl FlowOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FlowOutcome::Completed)
    }
}

/// Drives one call from [`CallState::Welcome`] to a terminal state.
pub struct CallFlow<C: ?Sized> {
    ctx: CallContext<C>,
}

impl<C> CallFlow<C>
where
    C: ChannelControl + ?Sized,
{
    pub fn new(ctx: CallContext<C>) -> Self {
        Self { ctx }
    }

    /// Run the flow for the call that `event` started.
    ///
    /// The same triggering event is threaded through every state. Errors end
    /// the flow without any compensating command such as a hangup.
    pub async fn run(&self, event: &InboundEvent) -> FlowOutcome {
        let channel_id = event
            .channel_id()
            .unwrap_or("<none>");
        let mut state = CallState::Welcome;

        loop {
            debug!(channel_id, state = state.name(), "entering state");
            match state
                .handle(&self.ctx, event)
                .await
            {
                Ok(Some(next)) => {
                    if next.name() != state.name() {
                        info!(channel_id, from = state.name(), to = next.name(), "call state transition");
                    }
                    state = next;
                }
                Ok(None) => return FlowOutcome::Completed,
                Err(e) => {
                    if matches!(e, AriError::DuplicateWait { .. }) {
                        error!(channel_id, state = state.name(), "call flow bug: {}", e);
                    } else {
                        warn!(channel_id, state = state.name(), "abandoning call: {}", e);
                    }
                    return FlowOutcome::Abandoned { state, error: e };
                }
            }
        }
    }
}
