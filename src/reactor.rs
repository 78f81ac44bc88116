//! Single-threaded readiness dispatcher.
//!
//! Components register a handle plus an [`EventHandler`] and the reactor
//! calls back into them as readiness is reported. Everything runs on one
//! thread; the only blocking point is the `poll` call, bounded by
//! [`WAKE_TIMEOUT`] so periodic callbacks fire even when no I/O arrives.
//!
//! Per ready handle, exactly one of error / hangup / readable-and-or-
//! writable is dispatched, in that priority order. Handlers must never
//! block; a handler returning `Err` is an unrecoverable fault and
//! propagates out of [`Reactor::run`].

use std::collections::{HashMap, HashSet};
use std::io;
use std::time::Duration;

use anyhow::{Result, ensure};
use mio::event::{Event, Source};
use mio::{Events, Interest, Poll, Registry, Token};

use crate::app::AppContext;

/// Upper bound on one blocking wait, so timer-driven sweeps still run.
pub const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// What the reactor should do with a handler after dispatching to it.
pub enum Flow {
    /// Keep the registration as-is.
    Continue,
    /// Drop the handler; its handle closes with it.
    Close,
    /// Hand the handler to [`AppContext::park`]. The handler must already
    /// have unregistered its handle.
    Park,
}

/// Per-handle callback set. Default error/hangup behavior is teardown;
/// handlers whose handle failing is a process-level fault override those
/// and return `Err`.
pub trait EventHandler {
    fn on_readable(&mut self, app: &mut AppContext, reactor: &mut Reactor) -> Result<Flow>;

    fn on_writable(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn on_error(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        Ok(Flow::Close)
    }

    fn on_hangup(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        Ok(Flow::Close)
    }

    /// Called when a parked handler is released from the waiters set.
    /// The handler re-registers itself if it wants to live on; the
    /// default drops it.
    fn wake(self: Box<Self>, _app: &mut AppContext, _reactor: &mut Reactor) {}
}

/// Callback run once per dispatch wake, before per-handle handlers.
pub type Periodic = Box<dyn FnMut(&mut AppContext, &mut Reactor) -> Result<()>>;

pub struct Reactor {
    poll: Poll,
    events: Events,
    handlers: HashMap<Token, Box<dyn EventHandler>>,
    tokens: HashSet<Token>,
    periodics: Vec<Periodic>,
    next_token: usize,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            handlers: HashMap::new(),
            tokens: HashSet::new(),
            periodics: Vec::new(),
            next_token: 0,
        })
    }

    /// Registry handle for components that flip their own interest
    /// outside a dispatch (e.g. the serial transport arming its
    /// transmit side).
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Register a handle for the given interest and reserve its token.
    /// Re-registration goes through [`Reactor::reregister`], which
    /// replaces the interest set atomically.
    pub fn register(&mut self, source: &mut dyn Source, interest: Interest) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(source, token, interest)?;
        self.tokens.insert(token);
        Ok(token)
    }

    /// Bind the callback half of a registration. Split from
    /// [`Reactor::register`] so a handler can register a handle it owns
    /// before moving itself into the reactor.
    pub fn attach(&mut self, token: Token, handler: Box<dyn EventHandler>) {
        self.handlers.insert(token, handler);
    }

    pub fn reregister(
        &mut self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Remove a registration. Unregistering a handle that was never
    /// registered is an internal fault.
    pub fn unregister(&mut self, source: &mut dyn Source, token: Token) -> Result<()> {
        ensure!(
            self.tokens.remove(&token),
            "unregister of unknown handle {token:?}"
        );
        self.poll.registry().deregister(source)?;
        self.handlers.remove(&token);
        Ok(())
    }

    pub fn register_periodic(&mut self, callback: Periodic) {
        self.periodics.push(callback);
    }

    /// Block for at most `timeout`, then run periodic callbacks and
    /// dispatch every ready handle once.
    pub fn poll_once(&mut self, app: &mut AppContext, timeout: Option<Duration>) -> Result<()> {
        let mut events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        let result = self.wake(app, &mut events, timeout);
        self.events = events;
        result
    }

    /// Dispatch forever. Returns only when a handler escalates a fault.
    pub fn run(&mut self, app: &mut AppContext) -> Result<()> {
        loop {
            self.poll_once(app, Some(WAKE_TIMEOUT))?;
        }
    }

    fn wake(
        &mut self,
        app: &mut AppContext,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<()> {
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            // A signal landing mid-wait is an empty wake, not a fault.
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        self.run_periodics(app)?;
        for event in events.iter() {
            self.dispatch(app, event)?;
        }
        Ok(())
    }

    fn run_periodics(&mut self, app: &mut AppContext) -> Result<()> {
        // Detach the list so callbacks may register further periodics.
        let mut periodics = std::mem::take(&mut self.periodics);
        let mut result = Ok(());
        for callback in periodics.iter_mut() {
            if let Err(err) = callback(app, self) {
                result = Err(err);
                break;
            }
        }
        let added = std::mem::replace(&mut self.periodics, periodics);
        self.periodics.extend(added);
        result
    }

    fn dispatch(&mut self, app: &mut AppContext, event: &Event) -> Result<()> {
        let token = event.token();
        // The handler may have been closed earlier in this same wake.
        let Some(mut handler) = self.handlers.remove(&token) else {
            return Ok(());
        };

        let flow = if event.is_error() {
            handler.on_error(app, self)?
        } else if event.is_read_closed() && event.is_write_closed() {
            handler.on_hangup(app, self)?
        } else {
            let mut flow = Flow::Continue;
            if event.is_readable() {
                flow = handler.on_readable(app, self)?;
            }
            if matches!(flow, Flow::Continue) && event.is_writable() {
                flow = handler.on_writable(app, self)?;
            }
            flow
        };

        match flow {
            Flow::Continue => {
                self.handlers.insert(token, handler);
            }
            Flow::Close => {
                // Dropping the handler closes its handle, which clears
                // the kernel-side registration.
                self.tokens.remove(&token);
            }
            Flow::Park => app.park(handler),
        }
        Ok(())
    }
}
