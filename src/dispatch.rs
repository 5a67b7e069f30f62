//! Top-level dispatch loop: one event stream, one task per call

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    client::ChannelControl,
    connection::{EventStreamConfig, EventSubscriber},
    correlator::EventCorrelator,
    event::{EventCategory, InboundEvent},
    flow::{CallContext, CallFlow, FlowOutcome, FlowSettings},
};

/// Routes events from the stream to per-call flows until stopped.
///
/// Owns the process-wide [`EventCorrelator`]; every subscriber it opens and
/// every call flow it spawns share that instance.
pub struct Dispatcher<C: ?Sized> {
    client: Arc<C>,
    correlator: Arc<EventCorrelator>,
    settings: Arc<FlowSettings>,
    stream_config: EventStreamConfig,
    shutdown: CancellationToken,
    calls: HashMap<String, JoinHandle<FlowOutcome>>,
}

impl<C> Dispatcher<C>
where
    C: ChannelControl + ?Sized + 'static,
{
    pub fn new(
        client: Arc<C>,
        settings: FlowSettings,
        stream_config: EventStreamConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            client,
            correlator: Arc::new(EventCorrelator::new()),
            settings: Arc::new(settings),
            stream_config,
            shutdown,
            calls: HashMap::new(),
        }
    }

    pub fn correlator(&self) -> &Arc<EventCorrelator> {
        &self.correlator
    }

    /// Channel ids with a call flow still running.
    pub fn active_calls(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Opens an event stream, dispatches everything it yields, and reopens it
    /// after the reconnect delay if the reader ever stops.
    pub async fn run(mut self) {
        let reconnect_delay = self
            .stream_config
            .reconnect_delay;

        while !self
            .shutdown
            .is_cancelled()
        {
            let mut stream =
                EventSubscriber::new(self.stream_config.clone(), self.correlator.clone()).spawn();
            info!("Dispatch loop listening for events");

            loop {
                let next = tokio::select! {
                    _ = self.shutdown.cancelled() => None,
                    event = stream.recv() => Some(event),
                };
                match next {
                    None => break,
                    Some(Some(event)) => self.dispatch(event),
                    Some(None) => {
                        error!("Event stream reader stopped");
                        break;
                    }
                }
            }
            drop(stream);

            if self
                .shutdown
                .is_cancelled()
            {
                break;
            }
            warn!("Reopening event stream in {:?}", reconnect_delay);
            self.pause(reconnect_delay).await;
        }

        self.stop_calls();
        info!("Dispatch loop stopped");
    }

    async fn pause(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Route one event. Digit events were already offered to the correlator
    /// by the subscriber and need nothing more here.
    pub fn dispatch(&mut self, event: InboundEvent) {
        self.reap_finished();

        match event.category() {
            EventCategory::CallStarted => self.start_call(event),
            EventCategory::CallEnded => self.end_call(&event),
            EventCategory::DigitReceived | EventCategory::Ignored => {
                trace!(event_type = %event.type_name(), channel_id = ?event.channel_id(), "not dispatched");
            }
        }
    }

    fn start_call(&mut self, event: InboundEvent) {
        let Some(channel_id) = event
            .channel_id()
            .map(str::to_string)
        else {
            return;
        };
        if self
            .calls
            .contains_key(&channel_id)
        {
            warn!(%channel_id, "call already in progress, ignoring duplicate start");
            return;
        }

        info!(%channel_id, "call started");
        let flow = CallFlow::new(CallContext {
            client: self.client.clone(),
            correlator: self.correlator.clone(),
            settings: self.settings.clone(),
        });
        let handle = tokio::spawn(async move { flow.run(&event).await });
        self.calls
            .insert(channel_id, handle);
    }

    fn end_call(&mut self, event: &InboundEvent) {
        let Some(channel_id) = event.channel_id() else {
            return;
        };
        info!(channel_id, "call ended");
        if let Some(handle) = self
            .calls
            .remove(channel_id)
        {
            handle.abort();
        }
    }

    fn reap_finished(&mut self) {
        self.calls
            .retain(|channel_id, handle| {
                let done = handle.is_finished();
                if done {
                    debug!(%channel_id, "call flow task finished");
                }
                !done
            });
    }

    fn stop_calls(&mut self) {
        let n = self
            .calls
            .len();
        for (_, handle) in self
            .calls
            .drain()
        {
            handle.abort();
        }
        if n > 0 {
            info!("Aborted {} in-flight call flow(s)", n);
        }
    }
}
