//! Pipe session handle and lifecycle phases
//!
//! One `PipeLink` exists per attachment. It observes the session's state
//! machine and supports explicit cancellation, which goes through the
//! same cleanup routine as natural termination.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::registry::{Listener, Payload};
use crate::stats::PipeStats;
use crate::stream::Writable;

/// Lifecycle of one pipe session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Listeners installed, data flowing
    Attached,
    /// Source ended cleanly, teardown in progress
    Ending,
    /// Source closed, teardown in progress
    Closing,
    /// Either endpoint errored
    Errored,
    /// Every session listener removed; terminal
    Cleaned,
}

/// Handle to one source → destination attachment
///
/// Returned by [`attach`](super::attach). Holds no strong reference to
/// either endpoint; dropping the handle leaves the session running.
pub struct PipeLink {
    pub(super) phase: Rc<Cell<LinkPhase>>,
    pub(super) ended: Rc<Cell<bool>>,
    pub(super) accounted: bool,
    pub(super) cleanup: Rc<RefCell<Option<Listener>>>,
    pub(super) dest: Weak<dyn Writable>,
    pub(super) stats: Rc<PipeStats>,
}

impl PipeLink {
    /// Current lifecycle phase
    pub fn phase(&self) -> LinkPhase {
        self.phase.get()
    }

    /// Whether teardown has completed
    pub fn is_cleaned(&self) -> bool {
        self.phase.get() == LinkPhase::Cleaned
    }

    /// Transfer counters for this session
    pub fn stats(&self) -> &PipeStats {
        &self.stats
    }

    /// Detach this session before natural completion
    ///
    /// Removes every listener the session installed, exactly as the
    /// end/close/error paths do, and balances this session's pipe-count
    /// increment (latched, at most once). The destination is not
    /// finalized: remaining sources keep feeding it, and a later
    /// attachment can still bring the count back up. Idempotent.
    pub fn detach(&self) {
        if self.accounted && !self.ended.replace(true) {
            if let Some(dest) = self.dest.upgrade() {
                let refs = dest.pipe_refs();
                refs.set(refs.get().saturating_sub(1));
            }
        }
        let cleanup = self.cleanup.borrow().clone();
        if let Some(cleanup) = cleanup {
            cleanup(&Payload::None);
            tracing::debug!("pipe session detached");
        }
    }
}
