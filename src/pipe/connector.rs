//! Pipe attachment and teardown
//!
//! `attach` installs the session's listeners on both registries and hands
//! back a [`PipeLink`]. Teardown is entered from four paths (source end,
//! source close, or an error on either side), and every path funnels into
//! one idempotent cleanup routine that removes each installed listener
//! from each registry it was added to.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::registry::{Listener, Payload, StreamEvent};
use crate::stats::PipeStats;
use crate::stream::{Readable, Writable};

use super::link::{LinkPhase, PipeLink};
use super::options::PipeOptions;

/// Which terminal event reached the finalize routine first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishPath {
    /// Source emitted `End`; the destination gets `end()`
    End,
    /// Source emitted `Close`; the destination gets `destroy()`
    Close,
}

/// Chaining sugar over [`attach`]
///
/// `a.pipe(&b)` returns the destination so attachments compose:
/// `a.pipe(&b).pipe(&c)` for a duplex `b`.
pub trait Pipe {
    /// Attach `dest` with default options
    fn pipe<W: Writable + 'static>(&self, dest: &Rc<W>) -> Rc<W>;

    /// Attach `dest` with explicit options
    fn pipe_with<W: Writable + 'static>(&self, dest: &Rc<W>, options: PipeOptions) -> Rc<W>;
}

impl<R: Readable + 'static> Pipe for Rc<R> {
    fn pipe<W: Writable + 'static>(&self, dest: &Rc<W>) -> Rc<W> {
        attach(self, dest, PipeOptions::default());
        Rc::clone(dest)
    }

    fn pipe_with<W: Writable + 'static>(&self, dest: &Rc<W>, options: PipeOptions) -> Rc<W> {
        attach(self, dest, options);
        Rc::clone(dest)
    }
}

/// Establish a live data channel from `source` to `dest`
///
/// Subscribes to the source's `Data`/`End`/`Close`/`Error` events and the
/// destination's `Drain`/`Error` events, increments the destination's
/// pipe-count (unless the session opted out via
/// [`PipeOptions::end`] or the destination is a terminal sink), emits
/// `Pipe` on the destination, and returns the session handle.
///
/// The listeners hold only weak references to the endpoints: a pipe
/// session never keeps its streams alive.
pub fn attach<R, W>(source: &Rc<R>, dest: &Rc<W>, options: PipeOptions) -> PipeLink
where
    R: Readable + 'static,
    W: Writable + 'static,
{
    if !dest.writable() {
        // Attaching to a finished destination is almost certainly a
        // caller bug; the session still installs so teardown stays
        // uniform, but nothing will be written.
        tracing::warn!("piping into a destination that is no longer writable");
    }

    let phase = Rc::new(Cell::new(LinkPhase::Attached));
    let ended = Rc::new(Cell::new(false));
    let stats = Rc::new(PipeStats::default());
    let cleanup_slot: Rc<RefCell<Option<Listener>>> = Rc::new(RefCell::new(None));

    let on_data: Listener = {
        let source = Rc::downgrade(source);
        let dest = Rc::downgrade(dest);
        let stats = Rc::clone(&stats);
        Rc::new(move |payload: &Payload| {
            let (Some(source), Some(dest)) = (source.upgrade(), dest.upgrade()) else {
                return;
            };
            let Some(chunk) = payload.chunk() else {
                return;
            };
            if !dest.writable() {
                return;
            }
            stats.record_chunk(chunk.len());
            if !dest.write(chunk.clone()) {
                // Pause synchronously, before any further queued data,
                // so nothing buffers up past this point.
                stats.record_pause();
                tracing::trace!(bytes = chunk.len(), "backpressure, pausing source");
                source.pause();
            }
        })
    };
    source.registry().subscribe(StreamEvent::Data, Rc::clone(&on_data));

    let on_drain: Listener = {
        let source = Rc::downgrade(source);
        let stats = Rc::clone(&stats);
        Rc::new(move |_: &Payload| {
            let Some(source) = source.upgrade() else {
                return;
            };
            if source.readable() {
                stats.record_resume();
                tracing::trace!("drain, resuming source");
                source.resume();
            }
        })
    };
    dest.registry().subscribe(StreamEvent::Drain, Rc::clone(&on_drain));

    // Auto-finalization accounting. Terminal sinks and `end: false`
    // sessions opt out, leaving finalization to the caller.
    let accounted = options.end && !dest.is_terminal_sink();
    let mut on_end = None;
    let mut on_close = None;
    if accounted {
        let refs = dest.pipe_refs();
        refs.set(refs.get() + 1);

        let finish = {
            let dest = Rc::downgrade(dest);
            let phase = Rc::clone(&phase);
            let ended = Rc::clone(&ended);
            let cleanup_slot = Rc::clone(&cleanup_slot);
            Rc::new(move |path: FinishPath| {
                // The first of end/close wins; the other is ignored.
                if ended.replace(true) {
                    return;
                }
                phase.set(match path {
                    FinishPath::End => LinkPhase::Ending,
                    FinishPath::Close => LinkPhase::Closing,
                });
                let remaining = dest.upgrade().map(|dest| {
                    let refs = dest.pipe_refs();
                    refs.set(refs.get().saturating_sub(1));
                    refs.get()
                });
                let cleanup = cleanup_slot.borrow().clone();
                if let Some(cleanup) = cleanup {
                    cleanup(&Payload::None);
                }
                let Some(dest) = dest.upgrade() else {
                    return;
                };
                match remaining {
                    Some(0) => match path {
                        FinishPath::End => {
                            tracing::debug!("last source ended, finishing destination");
                            dest.end();
                        }
                        FinishPath::Close => {
                            tracing::debug!("last source closed, destroying destination");
                            dest.destroy();
                        }
                    },
                    Some(open) => {
                        tracing::debug!(
                            open_sessions = open,
                            "finalization deferred, other sources still attached"
                        );
                    }
                    None => {}
                }
            })
        };
        let end_listener: Listener = {
            let finish = Rc::clone(&finish);
            Rc::new(move |_: &Payload| finish(FinishPath::End))
        };
        let close_listener: Listener = {
            let finish = Rc::clone(&finish);
            Rc::new(move |_: &Payload| finish(FinishPath::Close))
        };
        source.registry().subscribe(StreamEvent::End, Rc::clone(&end_listener));
        source.registry().subscribe(StreamEvent::Close, Rc::clone(&close_listener));
        on_end = Some(end_listener);
        on_close = Some(close_listener);
    }

    // Don't leave dangling pipes on errors: either side failing tears
    // the session down. Whether the error itself is fatal is decided at
    // the emit boundary, after this listener has removed itself.
    let on_error: Listener = {
        let phase = Rc::clone(&phase);
        let cleanup_slot = Rc::clone(&cleanup_slot);
        Rc::new(move |payload: &Payload| {
            phase.set(LinkPhase::Errored);
            let cleanup = cleanup_slot.borrow().clone();
            if let Some(cleanup) = cleanup {
                cleanup(payload);
            }
        })
    };
    source.registry().subscribe(StreamEvent::Error, Rc::clone(&on_error));
    dest.registry().subscribe(StreamEvent::Error, Rc::clone(&on_error));

    let cleanup: Listener = {
        let source = Rc::downgrade(source);
        let dest = Rc::downgrade(dest);
        let phase = Rc::clone(&phase);
        let slot = Rc::clone(&cleanup_slot);
        let on_data = Rc::clone(&on_data);
        let on_drain = Rc::clone(&on_drain);
        let on_end = on_end.clone();
        let on_close = on_close.clone();
        let on_error = Rc::clone(&on_error);
        Rc::new(move |_: &Payload| {
            // Taking the slot makes every later invocation a no-op.
            let me = slot.borrow_mut().take();
            let Some(me) = me else {
                return;
            };
            if let Some(source) = source.upgrade() {
                let registry = source.registry();
                registry.unsubscribe(StreamEvent::Data, &on_data);
                if let Some(on_end) = &on_end {
                    registry.unsubscribe(StreamEvent::End, on_end);
                }
                if let Some(on_close) = &on_close {
                    registry.unsubscribe(StreamEvent::Close, on_close);
                }
                registry.unsubscribe(StreamEvent::Error, &on_error);
                registry.unsubscribe(StreamEvent::End, &me);
                registry.unsubscribe(StreamEvent::Close, &me);
            }
            if let Some(dest) = dest.upgrade() {
                let registry = dest.registry();
                registry.unsubscribe(StreamEvent::Drain, &on_drain);
                registry.unsubscribe(StreamEvent::Error, &on_error);
                registry.unsubscribe(StreamEvent::End, &me);
                registry.unsubscribe(StreamEvent::Close, &me);
            }
            phase.set(LinkPhase::Cleaned);
            tracing::debug!("pipe session cleaned");
        })
    };
    *cleanup_slot.borrow_mut() = Some(Rc::clone(&cleanup));

    // An already-finished endpoint must not retain dangling handlers, so
    // cleanup listens for end/close on both sides directly.
    source.registry().subscribe(StreamEvent::End, Rc::clone(&cleanup));
    source.registry().subscribe(StreamEvent::Close, Rc::clone(&cleanup));
    dest.registry().subscribe(StreamEvent::End, Rc::clone(&cleanup));
    dest.registry().subscribe(StreamEvent::Close, Rc::clone(&cleanup));

    dest.registry().emit(
        StreamEvent::Pipe,
        &Payload::Attached(Rc::clone(source) as Rc<dyn Readable>),
    );
    tracing::debug!(
        accounted = accounted,
        open_sessions = dest.pipe_refs().get(),
        "pipe attached"
    );

    let dest: Weak<dyn Writable> = Rc::downgrade(&(Rc::clone(dest) as Rc<dyn Writable>));
    PipeLink {
        phase,
        ended,
        accounted,
        cleanup: cleanup_slot,
        dest,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    use bytes::Bytes;

    use crate::error::StreamError;
    use crate::registry::{Emitter, Listener, Payload, StreamEvent};

    use super::*;

    struct ScriptedSource {
        events: Emitter,
        readable: Cell<bool>,
        pauses: Cell<u32>,
        resumes: Cell<u32>,
    }

    impl ScriptedSource {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                events: Emitter::new(),
                readable: Cell::new(true),
                pauses: Cell::new(0),
                resumes: Cell::new(0),
            })
        }

        fn feed(&self, bytes: &'static [u8]) {
            self.events
                .emit(StreamEvent::Data, &Payload::Chunk(Bytes::from_static(bytes)));
        }

        fn finish(&self) {
            self.events.emit(StreamEvent::End, &Payload::None);
            self.readable.set(false);
        }

        fn close(&self) {
            self.events.emit(StreamEvent::Close, &Payload::None);
            self.readable.set(false);
        }
    }

    impl Readable for ScriptedSource {
        fn registry(&self) -> &Emitter {
            &self.events
        }

        fn readable(&self) -> bool {
            self.readable.get()
        }

        fn pause(&self) {
            self.pauses.set(self.pauses.get() + 1);
        }

        fn resume(&self) {
            self.resumes.set(self.resumes.get() + 1);
        }
    }

    struct ScriptedSink {
        events: Emitter,
        writable: Cell<bool>,
        terminal: Cell<bool>,
        refs: Cell<usize>,
        accepts: RefCell<VecDeque<bool>>,
        written: RefCell<Vec<Bytes>>,
        ends: Cell<u32>,
        destroys: Cell<u32>,
    }

    impl ScriptedSink {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                events: Emitter::new(),
                writable: Cell::new(true),
                terminal: Cell::new(false),
                refs: Cell::new(0),
                accepts: RefCell::new(VecDeque::new()),
                written: RefCell::new(Vec::new()),
                ends: Cell::new(0),
                destroys: Cell::new(0),
            })
        }

        /// Script the next write to return the backpressure signal
        fn refuse_next(&self) {
            self.accepts.borrow_mut().push_back(false);
        }

        fn drain(&self) {
            self.events.emit(StreamEvent::Drain, &Payload::None);
        }

        fn written_len(&self) -> usize {
            self.written.borrow().len()
        }
    }

    impl Writable for ScriptedSink {
        fn registry(&self) -> &Emitter {
            &self.events
        }

        fn writable(&self) -> bool {
            self.writable.get()
        }

        fn write(&self, chunk: Bytes) -> bool {
            self.written.borrow_mut().push(chunk);
            self.accepts.borrow_mut().pop_front().unwrap_or(true)
        }

        fn end(&self) {
            self.ends.set(self.ends.get() + 1);
            self.writable.set(false);
        }

        fn destroy(&self) {
            self.destroys.set(self.destroys.get() + 1);
            self.writable.set(false);
        }

        fn pipe_refs(&self) -> &Cell<usize> {
            &self.refs
        }

        fn is_terminal_sink(&self) -> bool {
            self.terminal.get()
        }
    }

    fn assert_no_session_listeners(source: &ScriptedSource, sink: &ScriptedSink) {
        for event in [
            StreamEvent::Data,
            StreamEvent::End,
            StreamEvent::Close,
            StreamEvent::Error,
        ] {
            assert_eq!(source.events.listener_count(event), 0, "source {}", event);
        }
        for event in [
            StreamEvent::Drain,
            StreamEvent::Error,
            StreamEvent::End,
            StreamEvent::Close,
        ] {
            assert_eq!(sink.events.listener_count(event), 0, "sink {}", event);
        }
    }

    #[test]
    fn test_data_flows_to_destination() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        source.feed(b"hello ");
        source.feed(b"world");

        assert_eq!(sink.written_len(), 2);
        assert_eq!(link.stats().chunks_forwarded(), 2);
        assert_eq!(link.stats().bytes_forwarded(), 11);
        assert_eq!(link.phase(), LinkPhase::Attached);
    }

    #[test]
    fn test_unwritable_destination_is_skipped() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        attach(&source, &sink, PipeOptions::default());

        sink.writable.set(false);
        source.feed(b"dropped");

        assert_eq!(sink.written_len(), 0);
    }

    #[test]
    fn test_backpressure_round_trip() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        sink.refuse_next();
        source.feed(b"first");
        assert_eq!(source.pauses.get(), 1);
        assert_eq!(source.resumes.get(), 0);

        sink.drain();
        assert_eq!(source.resumes.get(), 1);

        source.feed(b"second");
        assert_eq!(source.pauses.get(), 1);
        assert_eq!(source.resumes.get(), 1);
        assert_eq!(link.stats().pauses(), 1);
        assert_eq!(link.stats().resumes(), 1);
    }

    #[test]
    fn test_drain_after_source_stopped_does_not_resume() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        attach(&source, &sink, PipeOptions::default());

        source.readable.set(false);
        sink.drain();

        assert_eq!(source.resumes.get(), 0);
    }

    #[test]
    fn test_end_finalizes_destination() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());
        assert_eq!(sink.refs.get(), 1);

        source.feed(b"payload");
        source.finish();

        assert_eq!(sink.ends.get(), 1);
        assert_eq!(sink.destroys.get(), 0);
        assert_eq!(sink.refs.get(), 0);
        assert_eq!(link.phase(), LinkPhase::Cleaned);
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_close_destroys_destination() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        source.close();

        assert_eq!(sink.ends.get(), 0);
        assert_eq!(sink.destroys.get(), 1);
        assert_eq!(sink.refs.get(), 0);
        assert!(link.is_cleaned());
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_two_sources_single_finalize() {
        let first = ScriptedSource::new();
        let second = ScriptedSource::new();
        let sink = ScriptedSink::new();
        attach(&first, &sink, PipeOptions::default());
        attach(&second, &sink, PipeOptions::default());
        assert_eq!(sink.refs.get(), 2);

        first.finish();
        assert_eq!(sink.ends.get(), 0);
        assert_eq!(sink.refs.get(), 1);

        second.finish();
        assert_eq!(sink.ends.get(), 1);
        assert_eq!(sink.refs.get(), 0);
    }

    #[test]
    fn test_second_terminal_event_is_ignored() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        attach(&source, &sink, PipeOptions::default());

        source.close();
        source.finish();

        // Close won; the later end must not finalize again or underflow
        // the pipe-count.
        assert_eq!(sink.destroys.get(), 1);
        assert_eq!(sink.ends.get(), 0);
        assert_eq!(sink.refs.get(), 0);
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_close_then_error_cleanup_is_idempotent() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        source.close();
        // All session listeners are gone, so this reaches nobody and is
        // reported back as unobserved.
        let err = StreamError::Io("late failure".into());
        assert_eq!(source.events.emit_error(err.clone()), Err(err));

        assert_eq!(sink.destroys.get(), 1);
        assert_eq!(sink.ends.get(), 0);
        assert!(link.is_cleaned());
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_error_then_close_never_finalizes() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        // A caller-installed observer keeps the error non-fatal.
        source
            .events
            .subscribe(StreamEvent::Error, Rc::new(|_: &Payload| {}));
        let result = source.events.emit_error(StreamError::Other("boom".into()));
        assert!(result.is_ok());
        assert!(link.is_cleaned());

        source.close();

        // The errored session abandoned finalization entirely.
        assert_eq!(sink.ends.get(), 0);
        assert_eq!(sink.destroys.get(), 0);
        assert_eq!(source.events.listener_count(StreamEvent::Error), 1);
        assert_eq!(sink.events.listener_count(StreamEvent::Error), 0);
    }

    #[test]
    fn test_unhandled_source_error_propagates() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        // The pipe's own error listener is the only one installed, and it
        // removes itself during cleanup, so the error is unobserved.
        let err = StreamError::Io("connection reset".into());
        assert_eq!(source.events.emit_error(err.clone()), Err(err));
        assert!(link.is_cleaned());
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_destination_error_tears_down_too() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());

        let err = StreamError::Write("disk full".into());
        assert_eq!(sink.events.emit_error(err.clone()), Err(err));

        assert!(link.is_cleaned());
        source.feed(b"after error");
        assert_eq!(sink.written_len(), 0);
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_pipe_event_carries_source() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();

        let attached = Rc::new(Cell::new(false));
        let observer: Listener = {
            let attached = Rc::clone(&attached);
            let expected = Rc::clone(&source) as Rc<dyn Readable>;
            Rc::new(move |payload: &Payload| {
                if let Payload::Attached(actual) = payload {
                    attached.set(Rc::ptr_eq(actual, &expected));
                }
            })
        };
        sink.events.subscribe(StreamEvent::Pipe, observer);

        attach(&source, &sink, PipeOptions::default());
        assert!(attached.get());
    }

    #[test]
    fn test_end_false_leaves_finalization_to_caller() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default().end(false));
        assert_eq!(sink.refs.get(), 0);

        source.feed(b"data");
        source.finish();

        assert_eq!(sink.written_len(), 1);
        assert_eq!(sink.ends.get(), 0);
        assert_eq!(sink.destroys.get(), 0);
        assert!(link.is_cleaned());
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_terminal_sink_is_never_auto_finalized() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        sink.terminal.set(true);
        attach(&source, &sink, PipeOptions::default());
        assert_eq!(sink.refs.get(), 0);

        source.finish();

        assert_eq!(sink.ends.get(), 0);
        assert_no_session_listeners(&source, &sink);
    }

    #[test]
    fn test_detach_is_symmetric_with_completion() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&source, &sink, PipeOptions::default());
        assert_eq!(sink.refs.get(), 1);

        link.detach();
        assert_eq!(sink.refs.get(), 0);
        assert!(link.is_cleaned());
        assert_no_session_listeners(&source, &sink);

        // Detached sessions neither forward nor finalize.
        source.feed(b"ignored");
        source.finish();
        assert_eq!(sink.written_len(), 0);
        assert_eq!(sink.ends.get(), 0);

        // Idempotent: a second detach changes nothing.
        link.detach();
        assert_eq!(sink.refs.get(), 0);
    }

    #[test]
    fn test_detach_leaves_other_sessions_counted() {
        let first = ScriptedSource::new();
        let second = ScriptedSource::new();
        let sink = ScriptedSink::new();
        let link = attach(&first, &sink, PipeOptions::default());
        attach(&second, &sink, PipeOptions::default());

        link.detach();
        assert_eq!(sink.refs.get(), 1);

        second.finish();
        assert_eq!(sink.ends.get(), 1);
    }

    #[test]
    fn test_pipe_returns_destination_for_chaining() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();

        let returned = source.pipe(&sink);
        assert!(Rc::ptr_eq(&returned, &sink));

        source.feed(b"chained");
        assert_eq!(sink.written_len(), 1);
    }

    #[test]
    fn test_pipe_with_options() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();

        source.pipe_with(&sink, PipeOptions::default().end(false));
        assert_eq!(sink.refs.get(), 0);
    }

    #[test]
    fn test_pipe_into_finalized_destination_attaches_inert() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        sink.end();
        assert!(!sink.writable());

        // Deliberately unguarded: the attachment installs and warns, but
        // no data reaches the finished destination.
        let link = attach(&source, &sink, PipeOptions::default());
        source.feed(b"too late");
        assert_eq!(sink.written_len(), 0);

        source.finish();
        assert!(link.is_cleaned());
    }

    #[test]
    fn test_destination_end_releases_session_listeners() {
        let source = ScriptedSource::new();
        let sink = ScriptedSink::new();
        attach(&source, &sink, PipeOptions::default());

        // The destination finishing on its own must not leave the
        // session's handlers dangling on either object.
        sink.events.emit(StreamEvent::End, &Payload::None);

        assert_no_session_listeners(&source, &sink);
        source.feed(b"ignored");
        assert_eq!(sink.written_len(), 0);
    }
}
