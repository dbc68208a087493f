//! Chained pipes example with backpressure
//!
//! Run with: cargo run --example chained_pipes
//!
//! Builds a three-stage chain:
//!
//! ```text
//!   Producer ──pipe──► UppercaseRelay ──pipe──► ConsolePrinter
//! ```
//!
//! The relay grants a small write credit per round. When the credit runs
//! out its `write` returns the backpressure signal, the connector pauses
//! the producer, and pushed lines queue up inside the producer until the
//! relay drains. Ending the producer cascades: the first session finishes
//! the relay, the relay's own end finishes the printer.
//!
//! Set RUST_LOG=evstream_rs=debug to watch the sessions attach, pause,
//! resume and tear down.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use evstream_rs::{attach, Emitter, Payload, PipeOptions, Readable, StreamEvent, Writable};

/// How many writes the relay accepts before requesting backpressure
const RELAY_CREDIT: u32 = 2;

/// Line source with real pause/resume behavior
struct Producer {
    events: Emitter,
    readable: Cell<bool>,
    paused: Cell<bool>,
    backlog: RefCell<VecDeque<Bytes>>,
}

impl Producer {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            events: Emitter::new(),
            readable: Cell::new(true),
            paused: Cell::new(false),
            backlog: RefCell::new(VecDeque::new()),
        })
    }

    /// Emit a line now, or queue it while paused
    fn push(&self, line: &'static str) {
        let chunk = Bytes::from_static(line.as_bytes());
        if self.paused.get() {
            println!("[producer] paused, queueing {:?}", line.trim_end());
            self.backlog.borrow_mut().push_back(chunk);
        } else {
            self.events
                .emit(StreamEvent::Data, &Payload::Chunk(chunk));
        }
    }

    fn finish(&self) {
        self.readable.set(false);
        self.events.emit(StreamEvent::End, &Payload::None);
    }
}

impl Readable for Producer {
    fn registry(&self) -> &Emitter {
        &self.events
    }

    fn readable(&self) -> bool {
        self.readable.get()
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
        // Flush the backlog, stopping again if a write re-pauses us.
        while !self.paused.get() {
            let chunk = self.backlog.borrow_mut().pop_front();
            let Some(chunk) = chunk else { break };
            self.events
                .emit(StreamEvent::Data, &Payload::Chunk(chunk));
        }
    }
}

/// Duplex stage: uppercases incoming chunks and re-emits them downstream
struct UppercaseRelay {
    events: Emitter,
    refs: Cell<usize>,
    open: Cell<bool>,
    credit: Cell<u32>,
}

impl UppercaseRelay {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            events: Emitter::new(),
            refs: Cell::new(0),
            open: Cell::new(true),
            credit: Cell::new(RELAY_CREDIT),
        })
    }

    /// Restore the write credit and announce the drain
    fn relieve(&self) {
        println!("[relay] drained, granting {} more writes", RELAY_CREDIT);
        self.credit.set(RELAY_CREDIT);
        self.events.emit(StreamEvent::Drain, &Payload::None);
    }
}

impl Readable for UppercaseRelay {
    fn registry(&self) -> &Emitter {
        &self.events
    }

    fn readable(&self) -> bool {
        self.open.get()
    }
}

impl Writable for UppercaseRelay {
    fn registry(&self) -> &Emitter {
        &self.events
    }

    fn writable(&self) -> bool {
        self.open.get()
    }

    fn write(&self, chunk: Bytes) -> bool {
        let upper: Vec<u8> = chunk.iter().map(|b| b.to_ascii_uppercase()).collect();
        self.events
            .emit(StreamEvent::Data, &Payload::Chunk(Bytes::from(upper)));
        let left = self.credit.get().saturating_sub(1);
        self.credit.set(left);
        left > 0
    }

    fn end(&self) {
        self.open.set(false);
        self.events.emit(StreamEvent::End, &Payload::None);
    }

    fn destroy(&self) {
        self.open.set(false);
        self.events.emit(StreamEvent::Close, &Payload::None);
    }

    fn pipe_refs(&self) -> &Cell<usize> {
        &self.refs
    }
}

/// Final sink: prints whatever arrives
struct ConsolePrinter {
    events: Emitter,
    refs: Cell<usize>,
    open: Cell<bool>,
}

impl ConsolePrinter {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            events: Emitter::new(),
            refs: Cell::new(0),
            open: Cell::new(true),
        })
    }
}

impl Writable for ConsolePrinter {
    fn registry(&self) -> &Emitter {
        &self.events
    }

    fn writable(&self) -> bool {
        self.open.get()
    }

    fn write(&self, chunk: Bytes) -> bool {
        print!("[printer] {}", String::from_utf8_lossy(&chunk));
        true
    }

    fn end(&self) {
        self.open.set(false);
        println!("[printer] finished");
    }

    fn destroy(&self) {
        self.open.set(false);
        println!("[printer] destroyed");
    }

    fn pipe_refs(&self) -> &Cell<usize> {
        &self.refs
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let producer = Producer::new();
    let relay = UppercaseRelay::new();
    let printer = ConsolePrinter::new();

    // Watch upstream attachments arrive at the relay.
    <UppercaseRelay as Writable>::registry(relay.as_ref()).subscribe(
        StreamEvent::Pipe,
        Rc::new(|_: &Payload| println!("[relay] upstream attached")),
    );

    let upstream = attach(&producer, &relay, PipeOptions::default());
    let downstream = attach(&relay, &printer, PipeOptions::default());

    producer.push("alpha\n");
    producer.push("beta\n");
    // The relay's credit is spent; this one queues inside the producer.
    producer.push("gamma\n");
    producer.push("delta\n");

    // Downstream relief resumes the producer, which flushes its backlog.
    relay.relieve();

    // Ending the producer cascades through both sessions.
    producer.finish();

    println!(
        "[upstream]   {} chunks, {} bytes, {} pauses, {} resumes, phase {:?}",
        upstream.stats().chunks_forwarded(),
        upstream.stats().bytes_forwarded(),
        upstream.stats().pauses(),
        upstream.stats().resumes(),
        upstream.phase(),
    );
    println!(
        "[downstream] {} chunks, {} bytes, phase {:?}",
        downstream.stats().chunks_forwarded(),
        downstream.stats().bytes_forwarded(),
        downstream.phase(),
    );
}
