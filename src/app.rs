//! Process-wide mutable state.
//!
//! Everything here is touched only from the single dispatch context, so
//! no synchronization is used.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Config;
use crate::reactor::{EventHandler, Reactor};
use crate::serial::SerialTransport;
use crate::settings::DeviceSettings;

/// Minimum quiet period before the periodic sweep flushes long-pollers.
pub const NOTIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Cumulative counters exposed at `GET /debug`.
#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub http_conns: u64,
    pub http_reqs: u64,
}

pub struct AppContext {
    pub config: Config,
    pub settings: DeviceSettings,
    pub serial: SerialTransport,
    /// Parked long-poll connections. Never contains a closed connection;
    /// drained wholesale on every notify.
    pub waiters: Vec<Box<dyn EventHandler>>,
    pub last_notify: Instant,
    pub stats: Stats,
}

impl AppContext {
    pub fn new(config: Config, serial: SerialTransport) -> Self {
        Self {
            config,
            settings: DeviceSettings::new(),
            serial,
            waiters: Vec::new(),
            last_notify: Instant::now(),
            stats: Stats::default(),
        }
    }

    pub fn park(&mut self, handler: Box<dyn EventHandler>) {
        self.waiters.push(handler);
    }
}

/// Serve the current snapshot to every parked long-poller.
pub fn notify_waiters(app: &mut AppContext, reactor: &mut Reactor) {
    app.last_notify = Instant::now();
    for waiter in std::mem::take(&mut app.waiters) {
        waiter.wake(app, reactor);
    }
}

/// Periodic sweep: flush long-pollers that have waited out the interval.
pub fn maybe_notify_waiters(app: &mut AppContext, reactor: &mut Reactor) {
    if app.last_notify.elapsed() > NOTIFY_INTERVAL {
        notify_waiters(app, reactor);
    }
}
