//! # Change Detection
//!
//! Browser storage changes made by other contexts are observed either through
//! native storage events or by polling and diffing against a local snapshot.
//! The two cannot reliably run together without duplicate delivery, so
//! [`ChangeNotifier`] picks a strategy once at construction and only ever
//! moves from [`DetectionMode::Polling`] to [`DetectionMode::EventDriven`],
//! when the first native event arrives.

use bridge_traits::storage::{ListenerId, StorageEventCallback, WebStorage};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Periodic diff against the local snapshot.
    Polling,
    /// Native storage events only.
    EventDriven,
}

/// Poll callback run on every tick.
pub type PollTick = Arc<dyn Fn() + Send + Sync>;

struct NotifierState {
    mode: DetectionMode,
    /// Native events may still arrive (and flip the mode) while polling.
    native_armed: bool,
    native_listener: Option<ListenerId>,
    poller: Option<JoinHandle<()>>,
    running: bool,
}

/// Change detection strategy of one browser storage backend.
pub struct ChangeNotifier {
    storage: Arc<dyn WebStorage>,
    poll_interval: Duration,
    state: Mutex<NotifierState>,
}

impl ChangeNotifier {
    /// Probes `storage` for native events and selects the initial mode.
    ///
    /// Without native events the notifier polls. With them it is event
    /// driven, unless `prefer_polling` asks to start by polling; native events
    /// stay armed in that case and take over as soon as one fires.
    pub fn new(storage: Arc<dyn WebStorage>, poll_interval: Duration, prefer_polling: bool) -> Self {
        let native = storage.supports_change_events();
        let mode = if !native || prefer_polling {
            DetectionMode::Polling
        } else {
            DetectionMode::EventDriven
        };
        debug!(?mode, native, "Selected storage change detection");

        Self {
            storage,
            poll_interval,
            state: Mutex::new(NotifierState {
                mode,
                native_armed: native,
                native_listener: None,
                poller: None,
                running: false,
            }),
        }
    }

    pub fn mode(&self) -> DetectionMode {
        self.state.lock().mode
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start observing. `on_event` receives native events, `tick` runs on
    /// every poll.
    pub fn start(&self, on_event: StorageEventCallback, tick: PollTick) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        state.running = true;

        if state.native_armed {
            match self.storage.add_change_listener(on_event) {
                Ok(id) => state.native_listener = Some(id),
                Err(e) => {
                    warn!(error = %e, "Failed to attach native storage listener");
                    state.native_armed = false;
                }
            }
        }

        if state.mode == DetectionMode::Polling {
            state.poller = spawn_poller(self.poll_interval, move || {
                let tick = tick.clone();
                async move { tick() }
            });
        }
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.running = false;
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
        if let Some(id) = state.native_listener.take() {
            self.storage.remove_change_listener(id);
        }
    }

    /// A native event fired: trust native events from now on.
    pub fn native_event_received(&self) {
        let mut state = self.state.lock();
        if state.mode == DetectionMode::EventDriven {
            return;
        }
        state.mode = DetectionMode::EventDriven;
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
        info!("Native storage event received, polling disabled");
    }

    /// The poller saw a change first: keep polling and stop listening for
    /// native events, which would only duplicate it.
    pub fn poll_change_detected(&self) {
        let mut state = self.state.lock();
        if state.mode != DetectionMode::Polling || !state.native_armed {
            return;
        }
        state.native_armed = false;
        if let Some(id) = state.native_listener.take() {
            self.storage.remove_change_listener(id);
        }
        debug!("Poller detected change first, native listener detached");
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        if let Some(poller) = self.state.get_mut().poller.take() {
            poller.abort();
        }
    }
}

/// Runs `tick` every `interval` on the current Tokio runtime.
///
/// Returns `None` (and polling is skipped) when no runtime is available.
pub(crate) fn spawn_poller<F, Fut>(interval: Duration, tick: F) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("No async runtime available, storage polling disabled");
            return None;
        }
    };

    Some(handle.spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick().await;
        }
    }))
}
