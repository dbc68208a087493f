//! Pipe connector
//!
//! Wires a [`Readable`](crate::stream::Readable) source to a
//! [`Writable`](crate::stream::Writable) destination: data chunks flow
//! into `write`, backpressure flows back as `pause`/`resume`, and
//! whichever terminal event fires first (end, close, or an error on
//! either side) tears the wiring down exactly once.
//!
//! # Architecture
//!
//! ```text
//!   source registry                       destination registry
//!   ┌─────────────┐                       ┌─────────────┐
//!   │ Data ───────┼──► write(chunk) ─────►│             │
//!   │ End   ──┐   │      │ false          │ Drain ──────┼──► resume()
//!   │ Close ──┼───┼──► pause()            │ Error ──┐   │
//!   │ Error ──┤   │                       │ End ────┤   │
//!   └─────────┼───┘                       └─────────┼───┘
//!             ▼                                     ▼
//!        finish (decrement pipe-count,         cleanup (remove every
//!        end/destroy at zero)                  installed listener)
//! ```
//!
//! Several sources may feed one destination; the destination's
//! pipe-count defers finalization until the last of them has finished.

pub mod connector;
pub mod link;
pub mod options;

pub use connector::{attach, Pipe};
pub use link::{LinkPhase, PipeLink};
pub use options::PipeOptions;
