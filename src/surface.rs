//! Compositor-facing seams
//!
//! The present loop only sees these traits. The Wayland session implements
//! them for real; tests drive the loop with an in-memory fake.

use crate::damage::Rect;
use crate::shm::{FramePool, Slot};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use serde::{Deserialize, Serialize};
use std::os::fd::BorrowedFd;
use thiserror::Error;
use tracing::{info, warn};

/// Write side of the overlay surface
pub trait Surface {
    /// (Re)create the compositor buffers backed by `pool`
    fn bind_pool(&mut self, pool: &FramePool) -> anyhow::Result<()>;
    /// Attach the buffer for `slot` at (0, 0)
    fn attach(&mut self, slot: Slot);
    /// Mark a buffer-space region for recomposition; repeatable per commit
    fn damage(&mut self, rect: Rect);
    fn commit(&mut self);
}

/// Outgoing message channel to the compositor
pub trait Transport {
    fn flush(&mut self) -> Result<(), FlushError>;
    /// Block until the connection is ready for `interest`, reading any
    /// incoming events that arrive meanwhile
    fn wait(&mut self, interest: Interest) -> std::io::Result<()>;
    /// Hand over surface events dispatched since the last call
    fn dispatch_pending(&mut self) -> anyhow::Result<Vec<SurfaceEvent>>;
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error("connection buffer full")]
    WouldBlock,

    #[error("failed to flush compositor connection")]
    Fatal(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Wait without timeout until `fd` is ready for `interest`
pub fn wait_for_fd(fd: BorrowedFd<'_>, interest: Interest) -> std::io::Result<Readiness> {
    let events = match interest {
        Interest::Readable => PollFlags::POLLIN,
        Interest::ReadWrite => PollFlags::POLLIN | PollFlags::POLLOUT,
    };

    loop {
        let mut fds = [PollFd::new(fd, events)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                return Ok(Readiness {
                    readable: revents
                        .intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR),
                    writable: revents.contains(PollFlags::POLLOUT),
                });
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Events the present loop has to react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Compositor settled on a new size and it was acknowledged
    Resized { width: u32, height: u32 },
    /// Compositor proposed a size the policy refuses to run with
    Rejected { width: u32, height: u32 },
    /// Compositor is done reading the buffer for this slot
    Released(Slot),
    /// Layer surface was closed and torn down
    Closed,
}

/// What to do when a configure proposes a size other than the requested one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurePolicy {
    /// Acknowledge and resize the frame pool to match
    #[default]
    Accept,
    /// Log a warning and leave the configure unacknowledged
    Strict,
    /// Treat the mismatch as fatal
    Abort,
}

/// Receiver for layer-surface lifecycle events
pub trait LayerSurfaceHandler {
    /// Returns whether `serial` should be acknowledged
    fn on_configure(&mut self, serial: u32, width: u32, height: u32) -> bool;
    fn on_closed(&mut self);
}

/// Surface size bookkeeping driven by configure/closed
#[derive(Debug)]
pub struct SurfaceLifecycle {
    policy: ConfigurePolicy,
    width: u32,
    height: u32,
    configured: bool,
    closed: bool,
    events: Vec<SurfaceEvent>,
}

impl SurfaceLifecycle {
    pub fn new(width: u32, height: u32, policy: ConfigurePolicy) -> Self {
        Self {
            policy,
            width,
            height,
            configured: false,
            closed: false,
            events: Vec::new(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue an event produced outside configure/closed (buffer release)
    pub fn push(&mut self, event: SurfaceEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events)
    }
}

impl LayerSurfaceHandler for SurfaceLifecycle {
    fn on_configure(&mut self, serial: u32, width: u32, height: u32) -> bool {
        info!("layer_surface::configure serial={} {}x{}", serial, width, height);

        // Zero means the compositor leaves that dimension to us
        let width = if width == 0 { self.width } else { width };
        let height = if height == 0 { self.height } else { height };

        if (width, height) == (self.width, self.height) {
            self.configured = true;
            return true;
        }

        match self.policy {
            ConfigurePolicy::Accept => {
                info!("Resizing overlay {}x{} -> {}x{}", self.width, self.height, width, height);
                self.width = width;
                self.height = height;
                self.configured = true;
                self.events.push(SurfaceEvent::Resized { width, height });
                true
            }
            ConfigurePolicy::Strict => {
                warn!(
                    "Unexpected configure size {}x{} (want {}x{}), not acknowledging",
                    width, height, self.width, self.height
                );
                false
            }
            ConfigurePolicy::Abort => {
                warn!("Unexpected configure size {}x{}", width, height);
                self.events.push(SurfaceEvent::Rejected { width, height });
                false
            }
        }
    }

    fn on_closed(&mut self) {
        info!("layer_surface::closed");
        self.closed = true;
        self.events.push(SurfaceEvent::Closed);
    }
}
