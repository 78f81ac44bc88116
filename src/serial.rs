//! Half-duplex serial link to the auxiliary lamp controller.
//!
//! The line is slow and the far side samples one byte per tick, so the
//! transport transmits exactly one byte per writable wake and paces
//! itself with a monotonic-clock check. Inbound bytes accumulate until a
//! newline terminates the frame; oversized partial frames are dropped.
//!
//! Outbound commands are held in per-group pending slots: a newer unsent
//! command for a group replaces the older one, while the frame already
//! committed to the wire is always finished first.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use tracing::warn;

use crate::app::AppContext;
use crate::reactor::{EventHandler, Flow, Reactor};

/// Longest partial frame retained while waiting for the terminator.
pub const FRAME_MAX: usize = 26;

/// Minimum gap between transmitted bytes; the controller polls its UART
/// slowly and drops bytes that arrive back-to-back.
const BYTE_INTERVAL: Duration = Duration::from_millis(10);

/// Settings groups that each own one pending-command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    Color = 0,
    Speed = 1,
    Video = 2,
}

const GROUPS: usize = 3;

/// Seam between the settings model and the transport. The production
/// implementation is [`SerialTransport`]; tests substitute a recorder.
pub trait CommandSink {
    fn send_command(&mut self, group: CommandGroup, frame: Vec<u8>);
}

pub struct SerialTransport {
    port: File,
    registry: Registry,
    token: Option<Token>,
    /// Frame currently going out on the wire; never superseded.
    tx_current: VecDeque<u8>,
    /// One unsent command per group; overwriting supersedes.
    pending: [Option<Vec<u8>>; GROUPS],
    rx: Vec<u8>,
    last_tx: Instant,
    tx_armed: bool,
}

impl SerialTransport {
    pub fn open(path: &Path, registry: Registry) -> io::Result<Self> {
        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(path)?;
        Ok(Self {
            port,
            registry,
            token: None,
            tx_current: VecDeque::new(),
            pending: [None, None, None],
            rx: Vec::new(),
            last_tx: Instant::now(),
            tx_armed: false,
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }

    /// Record the token assigned when the port was registered.
    pub fn bind(&mut self, token: Token) {
        self.token = Some(token);
    }

    fn has_pending(&self) -> bool {
        self.pending.iter().any(Option::is_some)
    }

    fn interest(&self) -> Interest {
        if self.tx_armed {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Refresh the registration at the current interest. Also used to
    /// re-arm edge notifications after a one-byte read or write.
    pub fn rearm(&mut self) {
        let Some(token) = self.token else { return };
        let fd = self.port.as_raw_fd();
        let interest = self.interest();
        if let Err(err) = self.registry.reregister(&mut SourceFd(&fd), token, interest) {
            warn!(%err, "serial interest update failed");
        }
    }

    fn set_tx_armed(&mut self, armed: bool) {
        self.tx_armed = armed;
        self.rearm();
    }

    fn promote_pending(&mut self) {
        for slot in self.pending.iter_mut() {
            if let Some(frame) = slot.take() {
                self.tx_current.extend(frame);
                break;
            }
        }
    }

    /// Consume one inbound byte; returns a complete frame (terminator
    /// included) when one is finished.
    pub fn read_byte(&mut self) -> Option<Vec<u8>> {
        let mut byte = [0u8; 1];
        match (&self.port).read(&mut byte) {
            Ok(1) => {
                self.rx.push(byte[0]);
                if byte[0] == b'\n' {
                    return Some(std::mem::take(&mut self.rx));
                }
                if self.rx.len() > FRAME_MAX {
                    // Terminator never came; drop the partial frame.
                    self.rx.clear();
                }
                None
            }
            Ok(_) => None,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted =>
            {
                None
            }
            Err(err) => {
                warn!(%err, "serial read failed");
                None
            }
        }
    }

    /// Transmit at most one queued byte, respecting the inter-byte gap,
    /// then re-evaluate interest.
    pub fn write_tick(&mut self) {
        if self.tx_current.is_empty() {
            self.promote_pending();
        }
        if self.tx_current.is_empty() {
            self.set_tx_armed(false);
            return;
        }
        if self.last_tx.elapsed() < BYTE_INTERVAL {
            // Too soon for the line; keep the writable edge alive.
            self.rearm();
            return;
        }
        let byte = [self.tx_current[0]];
        match (&self.port).write(&byte) {
            Ok(0) => {}
            Ok(_) => {
                self.tx_current.pop_front();
                self.last_tx = Instant::now();
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => warn!(%err, "serial write failed"),
        }
        if self.tx_current.is_empty() && !self.has_pending() {
            self.set_tx_armed(false);
        } else {
            self.rearm();
        }
    }
}

impl CommandSink for SerialTransport {
    fn send_command(&mut self, group: CommandGroup, frame: Vec<u8>) {
        if self.tx_current.is_empty() && !self.has_pending() {
            self.tx_current.extend(frame);
        } else {
            self.pending[group as usize] = Some(frame);
        }
        self.set_tx_armed(true);
    }
}

/// Reactor-facing shim; the transport itself lives in [`AppContext`] so
/// the settings model can reach it.
pub struct SerialHandler;

impl EventHandler for SerialHandler {
    fn on_readable(&mut self, app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        let AppContext {
            serial, settings, ..
        } = app;
        if let Some(frame) = serial.read_byte() {
            settings.handle_status_frame(&frame, serial);
        }
        serial.rearm();
        Ok(Flow::Continue)
    }

    fn on_writable(&mut self, app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        app.serial.write_tick();
        Ok(Flow::Continue)
    }

    // Line glitches are not crash-worthy; the link is trusted for
    // liveness, not correctness.
    fn on_error(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        Ok(Flow::Continue)
    }

    fn on_hangup(&mut self, _app: &mut AppContext, _reactor: &mut Reactor) -> Result<Flow> {
        Ok(Flow::Continue)
    }
}
