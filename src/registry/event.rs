//! Event and payload types
//!
//! This module defines the named events observable on stream-capable
//! objects and the argument value delivered to their listeners.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::StreamError;
use crate::stream::Readable;

/// Events observable on stream-capable objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    /// A chunk of data is available from a readable
    Data,
    /// A readable finished cleanly
    End,
    /// A readable's underlying resource went away
    Close,
    /// Either endpoint failed
    Error,
    /// A writable relieved backpressure
    Drain,
    /// A new upstream attached to a writable
    Pipe,
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamEvent::Data => "data",
            StreamEvent::End => "end",
            StreamEvent::Close => "close",
            StreamEvent::Error => "error",
            StreamEvent::Drain => "drain",
            StreamEvent::Pipe => "pipe",
        };
        f.write_str(name)
    }
}

/// Argument delivered to listeners
///
/// Cheap to hand to every listener in a pass: chunk data is `Bytes`
/// (reference counted, cloning copies no payload bytes) and errors are
/// `Clone`.
#[derive(Clone)]
pub enum Payload {
    /// No argument (`End`, `Close`, `Drain`)
    None,
    /// The chunk carried by a `Data` event
    Chunk(Bytes),
    /// The error carried by an `Error` event
    Failure(StreamError),
    /// The source carried by a `Pipe` event
    Attached(Rc<dyn Readable>),
}

impl Payload {
    /// The data chunk, if this payload carries one
    pub fn chunk(&self) -> Option<&Bytes> {
        match self {
            Payload::Chunk(chunk) => Some(chunk),
            _ => None,
        }
    }

    /// The error, if this payload carries one
    pub fn failure(&self) -> Option<&StreamError> {
        match self {
            Payload::Failure(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::None => f.write_str("None"),
            Payload::Chunk(chunk) => f.debug_tuple("Chunk").field(&chunk.len()).finish(),
            Payload::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
            Payload::Attached(_) => f.write_str("Attached(..)"),
        }
    }
}

/// Callback registered with an [`Emitter`](super::Emitter)
///
/// Identity is the `Rc` allocation: clones of one `Rc` count as the same
/// listener for `unsubscribe`, separately built closures never match.
pub type Listener = Rc<dyn Fn(&Payload)>;
