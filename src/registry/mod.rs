//! Per-object event registry
//!
//! Every stream-capable object owns an [`Emitter`]: a mapping from event
//! name to an ordered list of listeners, with synchronous fan-out.
//!
//! # Architecture
//!
//! ```text
//!        object (source or destination)
//!       ┌──────────────────────────────┐
//!       │ Emitter {                    │
//!       │   slots: HashMap<            │
//!       │     StreamEvent,             │
//!       │     Vec<Option<Listener>>,   │
//!       │   >                          │
//!       │ }                            │
//!       └──────────────┬───────────────┘
//!                      │ emit(event, &payload)
//!         ┌────────────┼────────────┐
//!         ▼            ▼            ▼
//!    [listener 0] [listener 1] [listener 2]   (subscription order)
//! ```
//!
//! # Re-entrancy
//!
//! Listeners run synchronously and may call back into the registry they
//! were invoked from. A slot removed mid-pass becomes a tombstone
//! (`None`) in place: the in-flight pass skips it without disturbing the
//! positions of the listeners still due to run. Trailing tombstones are
//! compacted as soon as they form.

pub mod emitter;
pub mod event;

pub use emitter::Emitter;
pub use event::{Listener, Payload, StreamEvent};
