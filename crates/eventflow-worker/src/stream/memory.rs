//! In-process event log.
//!
//! Models the consumer-group protocol: a last-delivered cursor per group and a
//! pending list of delivered, unacknowledged entries with their owning
//! consumer and delivery count. Clones share the same streams.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventflow_engine::Event;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{dead_letter_fields, encode_event, EventLog, StreamEntry, StreamError};

const DEFAULT_MAXLEN: usize = 10_000;

#[derive(Default)]
struct StreamState {
    entries: VecDeque<(u64, HashMap<String, String>)>,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

struct PendingEntry {
    consumer: String,
    deliveries: u64,
}

#[derive(Default)]
struct Shared {
    streams: Mutex<HashMap<String, StreamState>>,
    notify: Notify,
}

/// Event log held in memory.
#[derive(Clone)]
pub struct InMemoryEventLog {
    shared: Arc<Shared>,
    stream: String,
    dead_letter_stream: String,
    group: String,
    consumer: String,
    maxlen: usize,
}

impl InMemoryEventLog {
    /// Create a log bound to `(stream, group, consumer)`.
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        let stream = stream.into();
        Self {
            shared: Arc::new(Shared::default()),
            dead_letter_stream: format!("{}.dead", stream),
            stream,
            group: group.into(),
            consumer: consumer.into(),
            maxlen: DEFAULT_MAXLEN,
        }
    }

    pub fn with_maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen.max(1);
        self
    }

    pub fn with_dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.dead_letter_stream = stream.into();
        self
    }

    /// Another consumer identity over the same streams.
    pub fn for_consumer(&self, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            stream: self.stream.clone(),
            dead_letter_stream: self.dead_letter_stream.clone(),
            group: group.into(),
            consumer: consumer.into(),
            maxlen: self.maxlen,
        }
    }

    /// All retained entries of a stream.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.shared
            .streams
            .lock()
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(seq, fields)| StreamEntry::new(format_id(*seq), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop a stream with its entries and consumer groups, like `DEL` on a
    /// Redis key.
    pub fn delete_stream(&self, stream: &str) {
        self.shared.streams.lock().remove(stream);
    }

    /// How many times an entry was delivered to this group.
    pub fn delivery_count(&self, id: &str) -> Option<u64> {
        let seq = parse_id(id).ok()?;
        let streams = self.shared.streams.lock();
        streams
            .get(&self.stream)?
            .groups
            .get(&self.group)?
            .pending
            .get(&seq)
            .map(|p| p.deliveries)
    }

    fn take(&self, count: usize) -> Result<Vec<StreamEntry>, StreamError> {
        let mut streams = self.shared.streams.lock();
        let StreamState {
            entries, groups, ..
        } = streams
            .get_mut(&self.stream)
            .ok_or_else(|| StreamError::MissingGroup(self.group.clone()))?;
        let group = groups
            .get_mut(&self.group)
            .ok_or_else(|| StreamError::MissingGroup(self.group.clone()))?;

        let mut batch = Vec::new();

        for (seq, pending) in group
            .pending
            .iter_mut()
            .filter(|(_, p)| p.consumer == self.consumer)
            .take(count)
        {
            pending.deliveries += 1;
            // Trimmed entries are still delivered, with no fields
            let fields = lookup(entries, *seq).cloned().unwrap_or_default();
            batch.push(StreamEntry::new(format_id(*seq), fields));
        }

        let remaining = count - batch.len();
        let cursor = group.last_delivered;
        for (seq, fields) in entries
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .take(remaining)
        {
            group.pending.insert(
                *seq,
                PendingEntry {
                    consumer: self.consumer.clone(),
                    deliveries: 1,
                },
            );
            group.last_delivered = *seq;
            batch.push(StreamEntry::new(format_id(*seq), fields.clone()));
        }

        Ok(batch)
    }

    fn append(&self, stream: &str, fields: Vec<(String, String)>) -> String {
        let mut streams = self.shared.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        state.last_seq += 1;
        let seq = state.last_seq;
        state.entries.push_back((seq, fields.into_iter().collect()));
        while state.entries.len() > self.maxlen {
            state.entries.pop_front();
        }
        format_id(seq)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        let mut streams = self.shared.streams.lock();
        streams
            .entry(self.stream.clone())
            .or_default()
            .groups
            .entry(self.group.clone())
            .or_default();
        Ok(())
    }

    async fn read(&self, count: usize, block: Duration) -> Result<Vec<StreamEntry>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        // No deadline when `block` is too large to represent
        let deadline = tokio::time::Instant::now().checked_add(block);
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take(count)?;
            if !batch.is_empty() || block.is_zero() {
                return Ok(batch);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let seq = parse_id(id)?;
        let mut streams = self.shared.streams.lock();
        if let Some(group) = streams
            .get_mut(&self.stream)
            .and_then(|s| s.groups.get_mut(&self.group))
        {
            group.pending.remove(&seq);
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, StreamError> {
        let streams = self.shared.streams.lock();
        Ok(streams
            .get(&self.stream)
            .and_then(|s| s.groups.get(&self.group))
            .map(|g| {
                g.pending
                    .values()
                    .filter(|p| p.consumer == self.consumer)
                    .count()
            })
            .unwrap_or(0))
    }

    async fn publish(&self, event: &Event) -> Result<String, StreamError> {
        let fields = encode_event(event)?;
        Ok(self.publish_fields(fields))
    }

    async fn dead_letter(&self, entry: &StreamEntry, reason: &str) -> Result<(), StreamError> {
        let stream = self.dead_letter_stream.clone();
        self.append(&stream, dead_letter_fields(entry, reason));
        Ok(())
    }
}

impl InMemoryEventLog {
    /// Append raw fields to the event stream, bypassing event encoding.
    pub fn publish_fields(&self, fields: Vec<(String, String)>) -> String {
        let id = self.append(&self.stream, fields);
        self.shared.notify.notify_waiters();
        id
    }
}

fn lookup(
    entries: &VecDeque<(u64, HashMap<String, String>)>,
    seq: u64,
) -> Option<&HashMap<String, String>> {
    entries
        .binary_search_by_key(&seq, |(s, _)| *s)
        .ok()
        .map(|i| &entries[i].1)
}

fn format_id(seq: u64) -> String {
    format!("{}-0", seq)
}

fn parse_id(id: &str) -> Result<u64, StreamError> {
    id.split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StreamError::InvalidId(id.to_string()))
}
