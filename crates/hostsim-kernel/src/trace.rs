//! Executed-event trace.
//!
//! When tracing is enabled every host records one [`TraceRecord`] per event
//! it executes.  Sorting the records of all hosts by their key gives the
//! global execution order, which is identical for every run with the same
//! config and seed, whatever the worker count.

use crate::event::{Event, EventKey, EventTag};
use crate::id::{HostId, ThreadId};
use crate::time::VirtualTime;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceRecord {
    pub time: VirtualTime,
    pub origin_host: HostId,
    pub origin_seq: u64,
    /// Host that executed the event.
    pub host: HostId,
    pub kind: EventTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadId>,
}

impl TraceRecord {
    pub fn new(host: HostId, event: &Event) -> Self {
        Self {
            time: event.key.time,
            origin_host: event.key.origin_host,
            origin_seq: event.key.origin_seq,
            host,
            kind: event.kind.tag(),
            thread: event.kind.thread(),
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            time: self.time,
            origin_host: self.origin_host,
            origin_seq: self.origin_seq,
        }
    }
}

/// Merge per-host traces into global execution order.
pub fn merge(traces: impl IntoIterator<Item = Vec<TraceRecord>>) -> Vec<TraceRecord> {
    let mut merged: Vec<TraceRecord> = traces.into_iter().flatten().collect();
    merged.sort_by_key(TraceRecord::key);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn record(t: u64, origin: u32, seq: u64) -> TraceRecord {
        let key = EventKey {
            time: VirtualTime::from_nanos(t),
            origin_host: HostId(origin),
            origin_seq: seq,
        };
        let event = Event::new(key, HostId(0), EventKind::StartThread { tid: ThreadId(7) });
        TraceRecord::new(HostId(0), &event)
    }

    #[test]
    fn record_keeps_key_and_thread() {
        let r = record(5, 2, 9);
        assert_eq!(r.key().origin_seq, 9);
        assert_eq!(r.kind, EventTag::StartThread);
        assert_eq!(r.thread, Some(ThreadId(7)));
    }

    #[test]
    fn merge_orders_by_event_key() {
        let merged = merge(vec![
            vec![record(5, 1, 0), record(9, 1, 1)],
            vec![record(5, 0, 3), record(7, 0, 4)],
        ]);
        let keys: Vec<(u64, u32)> = merged
            .iter()
            .map(|r| (r.time.as_nanos(), r.origin_host.as_u32()))
            .collect();
        assert_eq!(keys, vec![(5, 0), (5, 1), (7, 0), (9, 1)]);
    }

    #[test]
    fn serializes_without_empty_thread() {
        let mut r = record(1, 0, 0);
        r.thread = None;
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("\"thread\":"));
        assert!(json.contains("\"start_thread\""));
    }
}
