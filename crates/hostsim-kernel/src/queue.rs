//! Per-host event queue and cross-worker inbox.
//!
//! The queue is a `BTreeMap` keyed by [`EventKey`], so the pop order is a
//! pure function of the keys that were scheduled.  Insertion order and
//! hashing never participate.

use crate::error::SimError;
use crate::event::{Event, EventKey};
use crate::time::VirtualTime;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Ordered set of pending events owned by one host.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: BTreeMap<EventKey, Event>,
    now: VirtualTime,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the most recently popped event.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Insert an event.
    ///
    /// Fails with [`SimError::InvalidTime`] if the event would fire before
    /// the current time.  A duplicate key is an invariant violation, since
    /// sequence numbers are never reused.
    pub fn schedule(&mut self, event: Event) -> Result<(), SimError> {
        if event.key.time < self.now {
            return Err(SimError::InvalidTime {
                requested: event.key.time,
                now: self.now,
            });
        }
        let key = event.key;
        if self.events.insert(key, event).is_some() {
            return Err(SimError::invariant(format!("duplicate event key {key}")));
        }
        Ok(())
    }

    /// Remove and return the earliest event, advancing `now` to its time.
    pub fn pop_next(&mut self) -> Option<Event> {
        let (_, event) = self.events.pop_first()?;
        debug_assert!(event.key.time >= self.now);
        self.now = event.key.time;
        Some(event)
    }

    /// Pop the earliest event only if it fires at or before `last`.
    pub fn pop_through(&mut self, last: VirtualTime) -> Option<Event> {
        match self.events.first_key_value() {
            Some((key, _)) if key.time <= last => self.pop_next(),
            _ => None,
        }
    }

    /// Remove a pending event.  Returns it if it was still queued.
    pub fn cancel(&mut self, key: &EventKey) -> Option<Event> {
        self.events.remove(key)
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.events.contains_key(key)
    }

    pub fn next_time(&self) -> Option<VirtualTime> {
        self.events.first_key_value().map(|(key, _)| key.time)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop every pending event.  Used at teardown.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Hand-off point through which other workers deliver events to a host.
///
/// Pushed to during a round, drained by the owning worker at the start of
/// the next one.  The drained order does not matter because the queue
/// orders by key.
#[derive(Clone, Debug, Default)]
pub struct EventInbox {
    pending: Arc<Mutex<Vec<Event>>>,
}

impl EventInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push(event);
    }

    pub fn drain(&self) -> Vec<Event> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::id::{HostId, ThreadId};
    use proptest::prelude::*;

    fn event(t: u64, host: u32, seq: u64) -> Event {
        Event::new(
            EventKey {
                time: VirtualTime::from_nanos(t),
                origin_host: HostId(host),
                origin_seq: seq,
            },
            HostId(0),
            EventKind::ResumeThread { tid: ThreadId(1) },
        )
    }

    #[test]
    fn empty_queue_pops_nothing() {
        let mut q = EventQueue::new();
        assert!(q.pop_next().is_none());
        assert_eq!(q.next_time(), None);
        assert_eq!(q.now(), VirtualTime::ZERO);
    }

    #[test]
    fn pop_advances_now_monotonically() {
        let mut q = EventQueue::new();
        q.schedule(event(10, 0, 0)).unwrap();
        q.schedule(event(3, 0, 1)).unwrap();
        assert_eq!(q.pop_next().unwrap().time(), VirtualTime::from_nanos(3));
        assert_eq!(q.now(), VirtualTime::from_nanos(3));
        assert_eq!(q.pop_next().unwrap().time(), VirtualTime::from_nanos(10));
        assert_eq!(q.now(), VirtualTime::from_nanos(10));
    }

    #[test]
    fn scheduling_in_the_past_is_rejected() {
        let mut q = EventQueue::new();
        q.schedule(event(10, 0, 0)).unwrap();
        q.pop_next().unwrap();
        let err = q.schedule(event(9, 0, 1)).unwrap_err();
        assert!(matches!(
            err,
            SimError::InvalidTime { requested, now }
                if requested == VirtualTime::from_nanos(9) && now == VirtualTime::from_nanos(10)
        ));
        // Same instant is fine.
        q.schedule(event(10, 0, 2)).unwrap();
    }

    #[test]
    fn duplicate_key_is_an_invariant_violation() {
        let mut q = EventQueue::new();
        q.schedule(event(1, 0, 0)).unwrap();
        assert!(matches!(
            q.schedule(event(1, 0, 0)),
            Err(SimError::InvariantViolation(_))
        ));
    }

    #[test]
    fn cancel_removes_pending_event() {
        let mut q = EventQueue::new();
        let e = event(5, 0, 0);
        let key = e.key;
        q.schedule(e).unwrap();
        assert!(q.contains(&key));
        assert!(q.cancel(&key).is_some());
        assert!(q.cancel(&key).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn pop_through_respects_window_end() {
        let mut q = EventQueue::new();
        q.schedule(event(4, 0, 0)).unwrap();
        q.schedule(event(5, 0, 1)).unwrap();
        assert!(q.pop_through(VirtualTime::from_nanos(4)).is_some());
        assert!(q.pop_through(VirtualTime::from_nanos(4)).is_none());
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn inbox_drains_everything_once() {
        let inbox = EventInbox::new();
        let remote = inbox.clone();
        remote.push(event(1, 1, 0));
        remote.push(event(2, 1, 1));
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.drain().len(), 2);
        assert!(inbox.is_empty());
    }

    proptest! {
        #[test]
        fn pop_order_is_independent_of_insertion_order(
            (keys, shuffled_keys) in proptest::collection::btree_set((0u64..50, 0u32..4, 0u64..1000), 1..64)
                .prop_map(|s| s.into_iter().collect::<Vec<_>>())
                .prop_flat_map(|keys| (Just(keys.clone()), Just(keys).prop_shuffle())),
        ) {
            let mut forward = EventQueue::new();
            for &(t, h, s) in &keys {
                forward.schedule(event(t, h, s)).unwrap();
            }
            let mut shuffled = EventQueue::new();
            for &(t, h, s) in &shuffled_keys {
                shuffled.schedule(event(t, h, s)).unwrap();
            }

            let mut last = VirtualTime::ZERO;
            while let Some(a) = forward.pop_next() {
                let b = shuffled.pop_next().unwrap();
                prop_assert_eq!(a.key, b.key);
                prop_assert!(a.key.time >= last);
                last = a.key.time;
            }
            prop_assert!(shuffled.is_empty());
        }
    }
}
