//! Per-object listener registry
//!
//! The registry that backs every stream-capable object: an explicitly
//! initialized map from event to an ordered list of listener slots, with
//! synchronous in-order fan-out.
//!
//! Listeners may re-enter any registry operation from inside a fan-out,
//! including `emit` itself. Removal during an in-flight pass tombstones
//! the slot in place instead of shifting the list, so the pass skips the
//! removed listener without skipping or double-calling anything else.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Result, StreamError};

use super::event::{Listener, Payload, StreamEvent};

type SlotTable = HashMap<StreamEvent, Vec<Option<Listener>>>;

/// Ordered listener registry owned by one stream-capable object
///
/// Cloning is shallow: clones observe and mutate the same listener table,
/// which is what lets listeners capture a handle to the registry they
/// live in.
#[derive(Clone, Default)]
pub struct Emitter {
    slots: Rc<RefCell<SlotTable>>,
}

impl Emitter {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the event's list
    ///
    /// Never fails. Duplicate clones of one listener are tracked as
    /// distinct slots and fire once per slot.
    pub fn subscribe(&self, event: StreamEvent, listener: Listener) {
        self.slots
            .borrow_mut()
            .entry(event)
            .or_default()
            .push(Some(listener));
        tracing::trace!(event = %event, "listener subscribed");
    }

    /// Subscribe a listener that removes itself on first invocation
    ///
    /// The wrapper unsubscribes before running the inner callback, so a
    /// re-entrant `emit` from inside the callback cannot reach it a
    /// second time.
    pub fn subscribe_once(&self, event: StreamEvent, listener: Listener) {
        let slot: Rc<RefCell<Option<Listener>>> = Rc::new(RefCell::new(None));
        // Weak, or the table would hold its own anchor through the wrapper.
        let table = Rc::downgrade(&self.slots);
        let wrapper: Listener = {
            let slot = Rc::clone(&slot);
            Rc::new(move |payload: &Payload| {
                // Taking the slot doubles as the fired latch.
                let me = slot.borrow_mut().take();
                let Some(me) = me else { return };
                if let Some(slots) = table.upgrade() {
                    Emitter { slots }.unsubscribe(event, &me);
                }
                listener(payload);
            })
        };
        *slot.borrow_mut() = Some(Rc::clone(&wrapper));
        self.subscribe(event, wrapper);
    }

    /// Remove the first live slot holding `listener`
    ///
    /// Matching is `Rc` pointer identity. Unknown events and absent
    /// listeners are no-ops. Safe while an emit over the same event is in
    /// flight: the slot is tombstoned in place, never shifted.
    pub fn unsubscribe(&self, event: StreamEvent, listener: &Listener) {
        let mut slots = self.slots.borrow_mut();
        let Some(list) = slots.get_mut(&event) else {
            return;
        };
        let Some(index) = list
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|l| Rc::ptr_eq(l, listener)))
        else {
            return;
        };
        list[index] = None;
        // Tombstones are transient: trailing ones are compacted right away.
        if index == list.len() - 1 {
            while matches!(list.last(), Some(None)) {
                list.pop();
            }
        }
        if list.is_empty() {
            slots.remove(&event);
        }
        tracing::trace!(event = %event, "listener unsubscribed");
    }

    /// Clear one event's list, or every list when `event` is `None`
    pub fn unsubscribe_all(&self, event: Option<StreamEvent>) {
        let mut slots = self.slots.borrow_mut();
        match event {
            Some(event) => {
                slots.remove(&event);
            }
            None => slots.clear(),
        }
    }

    /// Synchronously invoke each live listener in subscription order
    ///
    /// The list length is snapshotted at entry: listeners added during
    /// the pass run on the next emit, listeners removed during the pass
    /// are skipped.
    pub fn emit(&self, event: StreamEvent, payload: &Payload) {
        let len = match self.slots.borrow().get(&event) {
            Some(list) => list.len(),
            None => return,
        };
        tracing::trace!(event = %event, listeners = len, payload = ?payload, "emit");
        for index in 0..len {
            // Re-borrow per slot so listeners can mutate the table.
            let listener = {
                let slots = self.slots.borrow();
                slots
                    .get(&event)
                    .and_then(|list| list.get(index))
                    .and_then(|slot| slot.clone())
            };
            if let Some(listener) = listener {
                listener(payload);
            }
        }
    }

    /// Emit an `Error` event, surfacing it when nobody observes it
    ///
    /// The listener count is checked after the fan-out, so a listener
    /// that removed itself while handling the error (pipe cleanup does)
    /// no longer counts as an observer. An unobserved stream error is a
    /// programming error, not a recoverable condition: it comes back as
    /// `Err` for the emitting caller to propagate.
    pub fn emit_error(&self, err: StreamError) -> Result<()> {
        self.emit(StreamEvent::Error, &Payload::Failure(err.clone()));
        if self.listener_count(StreamEvent::Error) == 0 {
            tracing::error!(error = %err, "unhandled stream error");
            return Err(err);
        }
        Ok(())
    }

    /// Number of live listeners for `event`
    pub fn listener_count(&self, event: StreamEvent) -> usize {
        self.slots
            .borrow()
            .get(&event)
            .map_or(0, |list| list.iter().filter(|slot| slot.is_some()).count())
    }

    /// Whether any event has a live listener
    pub fn is_empty(&self) -> bool {
        self.slots
            .borrow()
            .values()
            .all(|list| list.iter().all(|slot| slot.is_none()))
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("events", &self.slots.borrow().len())
            .finish()
    }
}
