//! Photovoltaic polling: fetch, decode, cache and fan out.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::status::{PhotovoltaicStatus, STATUS_REGISTERS, StatusError};
use crate::subscribers::{StatusObserver, SubscriberRegistry, Subscription};
use crate::transport::{RegisterReader, TransportError};
use crate::value::RegisterDescriptor;

/// Errors that stop the poll loop.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Decode error: {0}")]
    Decode(#[from] StatusError),
}

/// Timing of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Period of the cycle tick.
    pub interval: Duration,
    /// Wait after a successful read, inside the cycle.
    pub pacing_delay: Duration,
    /// Wait between attempts while the inverter is unreachable.
    pub backoff_delay: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            pacing_delay: Duration::from_secs(10),
            backoff_delay: Duration::from_secs(30),
        }
    }
}

/// Read access to the latest reading.
///
/// Empty before the first successful read and while the inverter is unreachable.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<ArcSwapOption<PhotovoltaicStatus>>,
}

impl StatusHandle {
    /// The latest reading, if any.
    pub fn current(&self) -> Option<Arc<PhotovoltaicStatus>> {
        self.inner.load_full()
    }

    /// Whether a reading is cached.
    pub fn is_available(&self) -> bool {
        self.inner.load().is_some()
    }

    pub(crate) fn replace(&self, status: Arc<PhotovoltaicStatus>) {
        self.inner.store(Some(status));
    }

    pub(crate) fn clear(&self) {
        self.inner.store(None);
    }
}

/// Connectivity as last observed by the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Result of one cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A status was published and the pacing delay elapsed.
    Published,
    /// The cancellation token fired.
    Cancelled,
    /// Unrecoverable error; the loop must stop.
    Fatal(PollError),
}

/// Periodically reads the inverter and publishes the decoded status.
pub struct PhotovoltaicService<R> {
    reader: R,
    registers: Vec<RegisterDescriptor>,
    timing: PollTiming,
    status: StatusHandle,
    subscribers: SubscriberRegistry,
}

impl<R: RegisterReader> PhotovoltaicService<R> {
    /// Create a service polling [`STATUS_REGISTERS`] through `reader`.
    pub fn new(reader: R, timing: PollTiming) -> Self {
        Self {
            reader,
            registers: STATUS_REGISTERS.to_vec(),
            timing,
            status: StatusHandle::default(),
            subscribers: SubscriberRegistry::new(),
        }
    }

    /// Handle to the cached status, for readers outside the poll loop.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// The registry notified on every reading.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Shorthand for `subscribers().subscribe(observer)`.
    pub fn subscribe(&self, observer: Arc<dyn StatusObserver>) -> Subscription {
        self.subscribers.subscribe(observer)
    }

    /// The latest cached reading.
    pub fn current_status(&self) -> Option<Arc<PhotovoltaicStatus>> {
        self.status.current()
    }

    /// Run the poll loop until `cancel` fires or a fatal error occurs.
    ///
    /// The first cycle starts immediately. Subscribers are told about the
    /// outcome: `on_completed` on cancellation, `on_error` on a fatal error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PollError> {
        // interval() panics on a zero period
        let period = self.timing.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut link = LinkState::Connected;

        info!(
            interval = ?self.timing.interval,
            pacing_delay = ?self.timing.pacing_delay,
            backoff_delay = ?self.timing.backoff_delay,
            "Starting photovoltaic polling"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.complete();
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.fetch(&mut link, &cancel).await {
                CycleOutcome::Published => {}
                CycleOutcome::Cancelled => {
                    self.complete();
                    return Ok(());
                }
                CycleOutcome::Fatal(e) => {
                    error!(error = %e, "Photovoltaic polling failed");
                    self.subscribers.broadcast_error(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Run one cycle, retrying connectivity failures until a read succeeds.
    pub async fn fetch(&self, link: &mut LinkState, cancel: &CancellationToken) -> CycleOutcome {
        loop {
            match self.reader.read_registers(&self.registers, cancel).await {
                Ok(values) => {
                    if *link == LinkState::Disconnected {
                        info!("Connection to inverter restored");
                    }
                    *link = LinkState::Connected;

                    let status = match PhotovoltaicStatus::from_registers(&values) {
                        Ok(status) => status,
                        Err(e) => return CycleOutcome::Fatal(e.into()),
                    };
                    self.publish(status);

                    if !sleep_or_cancel(self.timing.pacing_delay, cancel).await {
                        return CycleOutcome::Cancelled;
                    }
                    return CycleOutcome::Published;
                }
                Err(TransportError::Cancelled) => return CycleOutcome::Cancelled,
                Err(e) if e.is_connectivity() => {
                    if *link == LinkState::Connected {
                        error!(error = %e, "Failed to query photovoltaic status");
                        *link = LinkState::Disconnected;
                    } else {
                        debug!(error = %e, "Inverter still unreachable");
                    }
                    self.status.clear();

                    debug!(retry_in = ?self.timing.backoff_delay, "Waiting before next attempt");
                    if !sleep_or_cancel(self.timing.backoff_delay, cancel).await {
                        return CycleOutcome::Cancelled;
                    }
                }
                Err(e) => return CycleOutcome::Fatal(e.into()),
            }
        }
    }

    fn publish(&self, status: PhotovoltaicStatus) {
        info!(
            power = status.power,
            battery_percentage = status.battery.percentage * 100.0,
            battery_state = %status.battery.state,
            battery_status_code = status.battery.status_code,
            "Photovoltaic status updated"
        );

        let status = Arc::new(status);
        self.status.replace(status.clone());
        self.subscribers.broadcast_next(&status);
    }

    fn complete(&self) {
        info!("Photovoltaic polling stopped");
        self.subscribers.broadcast_complete();
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
