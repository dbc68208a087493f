//! Event-notification and stream-piping primitives
//!
//! Two layered components:
//!
//! - [`registry`]: a per-object listener registry ([`Emitter`]) with
//!   ordered subscribe/unsubscribe and synchronous fan-out emission.
//! - [`pipe`]: a connector that wires a [`Readable`] source to a
//!   [`Writable`] destination, forwarding data chunks, translating
//!   backpressure into `pause`/`resume`, and tearing its wiring down
//!   exactly once no matter which terminal event fires first.
//!
//! Everything is single-threaded and purely reactive: no background
//! tasks, no timers, no blocking. "Pause" is a promise between the
//! source and the connector, not a suspended thread.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use bytes::Bytes;
//! use evstream_rs::{Emitter, Payload, Pipe, Readable, StreamEvent, Writable};
//!
//! struct Tap {
//!     events: Emitter,
//! }
//!
//! # impl Readable for Tap {
//! #     fn registry(&self) -> &Emitter { &self.events }
//! #     fn readable(&self) -> bool { true }
//! # }
//! struct Sink {
//!     events: Emitter,
//!     refs: Cell<usize>,
//!     done: Cell<bool>,
//! }
//!
//! # impl Writable for Sink {
//! #     fn registry(&self) -> &Emitter { &self.events }
//! #     fn writable(&self) -> bool { !self.done.get() }
//! #     fn write(&self, chunk: Bytes) -> bool { !chunk.is_empty() }
//! #     fn end(&self) { self.done.set(true); }
//! #     fn destroy(&self) { self.done.set(true); }
//! #     fn pipe_refs(&self) -> &Cell<usize> { &self.refs }
//! # }
//! let tap = Rc::new(Tap { events: Emitter::new() });
//! let sink = Rc::new(Sink {
//!     events: Emitter::new(),
//!     refs: Cell::new(0),
//!     done: Cell::new(false),
//! });
//!
//! tap.pipe(&sink);
//! tap.registry()
//!     .emit(StreamEvent::Data, &Payload::Chunk(Bytes::from_static(b"hello")));
//! tap.registry().emit(StreamEvent::End, &Payload::None);
//! assert!(sink.done.get());
//! ```

pub mod error;
pub mod pipe;
pub mod registry;
pub mod stats;
pub mod stream;

pub use error::{Result, StreamError};
pub use pipe::{attach, LinkPhase, Pipe, PipeLink, PipeOptions};
pub use registry::{Emitter, Listener, Payload, StreamEvent};
pub use stats::PipeStats;
pub use stream::{Readable, Writable};
