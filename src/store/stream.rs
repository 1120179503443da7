use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::StoreError;

/// Stream entry id, rendered `<millis>-<seq>`. Ids grow strictly within a stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct StreamId {
    pub millis: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { millis: 0, seq: 0 };

    pub fn new(
        millis: u64,
        seq: u64,
    ) -> Self {
        Self { millis, seq }
    }

    /// Smallest id greater than `self` for the given wall-clock time.
    pub(crate) fn next_after(
        &self,
        now_millis: u64,
    ) -> Self {
        if now_millis > self.millis {
            StreamId::new(now_millis, 0)
        } else {
            StreamId::new(self.millis, self.seq + 1)
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidStreamId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, q),
            None => (s, "0"),
        };
        Ok(StreamId {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// One delivered stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(String, String)>,
    /// How many times the entry has been handed to a consumer, this
    /// delivery included. Anything above 1 is a redelivery.
    pub delivery_count: u64,
}

impl StreamEntry {
    pub fn field(
        &self,
        name: &str,
    ) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Read position of a consumer group read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries never delivered to any group member (`>`)
    New,
    /// The consumer's own delivered-but-unacknowledged entries (`0`)
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PendingEntry {
    pub(crate) consumer: String,
    pub(crate) delivery_count: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ConsumerGroup {
    pub(crate) last_delivered: StreamId,
    pub(crate) pending: BTreeMap<StreamId, PendingEntry>,
}

#[derive(Debug, Default)]
pub(crate) struct Stream {
    pub(crate) entries: BTreeMap<StreamId, Vec<(String, String)>>,
    pub(crate) last_id: StreamId,
    pub(crate) groups: HashMap<String, ConsumerGroup>,
}

impl Stream {
    pub(crate) fn append(
        &mut self,
        now_millis: u64,
        fields: Vec<(String, String)>,
    ) -> StreamId {
        let id = self.last_id.next_after(now_millis);
        self.entries.insert(id, fields);
        self.last_id = id;
        id
    }

    /// Delivers up to `count` undelivered entries and marks them pending.
    pub(crate) fn deliver_new(
        &mut self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Option<Vec<StreamEntry>> {
        let entries = &self.entries;
        let group = self.groups.get_mut(group)?;

        let delivered: Vec<StreamEntry> = entries
            .range((
                std::ops::Bound::Excluded(group.last_delivered),
                std::ops::Bound::Unbounded,
            ))
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
                delivery_count: 1,
            })
            .collect();

        for entry in &delivered {
            group.last_delivered = entry.id;
            group.pending.insert(
                entry.id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                },
            );
        }
        Some(delivered)
    }

    /// Re-delivers up to `count` of the consumer's pending entries, oldest first.
    pub(crate) fn deliver_pending(
        &mut self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Option<Vec<StreamEntry>> {
        let entries = &self.entries;
        let group = self.groups.get_mut(group)?;

        let mut delivered = Vec::new();
        for (id, pending) in group.pending.iter_mut() {
            if delivered.len() >= count {
                break;
            }
            if pending.consumer != consumer {
                continue;
            }
            if let Some(fields) = entries.get(id) {
                pending.delivery_count += 1;
                delivered.push(StreamEntry {
                    id: *id,
                    fields: fields.clone(),
                    delivery_count: pending.delivery_count,
                });
            }
        }
        Some(delivered)
    }
}
