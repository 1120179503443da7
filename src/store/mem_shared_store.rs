use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::AdmissionCode;
use super::AdmissionRequest;
use super::ReadFrom;
use super::SharedStore;
use super::Stream;
use super::StreamEntry;
use super::StreamId;
use super::value::no_group;
use super::value::parse_stock;
use super::value::wrong_type;
use super::value::Value;
use crate::utils::time::get_now_as_millis;
use crate::Result;
use crate::StoreError;

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    slots: HashMap<String, Slot>,
    streams: HashMap<String, Stream>,
}

impl Keyspace {
    /// Returns the live slot under `key`, dropping it first if it has expired.
    fn live(
        &mut self,
        key: &str,
    ) -> Option<&mut Slot> {
        let expired = match self.slots.get(key) {
            Some(slot) => slot.expires_at.is_some_and(|at| at <= Instant::now()),
            None => return None,
        };
        if expired {
            trace!("key {key} expired");
            self.slots.remove(key);
            return None;
        }
        self.slots.get_mut(key)
    }

    fn get_str(
        &mut self,
        key: &str,
    ) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(slot) => Err(wrong_type(key, &slot.value)),
        }
    }

    fn put(
        &mut self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) {
        self.slots.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    fn incr_by(
        &mut self,
        key: &str,
        delta: i64,
    ) -> Result<i64> {
        match self.live(key) {
            None => {
                self.put(key, Value::Str(delta.to_string()), None);
                Ok(delta)
            }
            Some(slot) => match &mut slot.value {
                Value::Str(s) => {
                    let current: i64 = s
                        .parse()
                        .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
                    let next = current + delta;
                    *s = next.to_string();
                    Ok(next)
                }
                other => Err(wrong_type(key, other)),
            },
        }
    }

    fn is_member(
        &mut self,
        key: &str,
        member: &str,
    ) -> Result<bool> {
        match self.live(key) {
            None => Ok(false),
            Some(Slot {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(slot) => Err(wrong_type(key, &slot.value)),
        }
    }

    fn add_member(
        &mut self,
        key: &str,
        member: &str,
    ) -> Result<()> {
        match self.live(key) {
            None => {
                let set = HashSet::from([member.to_string()]);
                self.put(key, Value::Set(set), None);
                Ok(())
            }
            Some(Slot {
                value: Value::Set(set),
                ..
            }) => {
                set.insert(member.to_string());
                Ok(())
            }
            Some(slot) => Err(wrong_type(key, &slot.value)),
        }
    }

    fn stream_mut(
        &mut self,
        stream: &str,
    ) -> &mut Stream {
        self.streams.entry(stream.to_string()).or_default()
    }
}

/// In-process [`SharedStore`].
///
/// Every operation runs under one keyspace mutex, which is what makes the
/// scripted operations indivisible. TTLs follow `tokio::time::Instant`, so
/// paused-clock tests can move expiry forward.
#[derive(Debug)]
pub struct MemorySharedStore {
    keyspace: Mutex<Keyspace>,
    // wakes readers blocked on a stream
    notifiers: DashMap<String, Arc<Notify>>,
    available: AtomicBool,
}

impl Default for MemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            notifiers: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store becoming unreachable (or reachable again).
    pub fn set_available(
        &self,
        available: bool,
    ) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys, streams excluded.
    pub fn len(&self) -> usize {
        let mut keyspace = self.keyspace.lock();
        let now = Instant::now();
        keyspace
            .slots
            .retain(|_, slot| slot.expires_at.map_or(true, |at| at > now));
        keyspace.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`; `None` if missing or persistent.
    pub fn ttl(
        &self,
        key: &str,
    ) -> Option<Duration> {
        let mut keyspace = self.keyspace.lock();
        keyspace
            .live(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()).into())
        }
    }

    fn notifier(
        &self,
        stream: &str,
    ) -> Arc<Notify> {
        self.notifiers.entry(stream.to_string()).or_default().clone()
    }

    fn append(
        keyspace: &mut Keyspace,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> StreamId {
        let now = get_now_as_millis().max(0) as u64;
        keyspace.stream_mut(stream).append(now, fields)
    }
}

#[async_trait]
impl SharedStore for MemorySharedStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        self.check_available()?;
        self.keyspace.lock().get_str(key)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_available()?;
        self.keyspace.lock().put(key, Value::Str(value.to_string()), ttl);
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.put(key, Value::Str(value.to_string()), Some(ttl));
        Ok(true)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        let existed = keyspace.live(key).is_some();
        keyspace.slots.remove(key);
        Ok(existed)
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        match keyspace.live(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr(
        &self,
        key: &str,
    ) -> Result<i64> {
        self.check_available()?;
        self.keyspace.lock().incr_by(key, 1)
    }

    async fn hget_all(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        match keyspace.live(key) {
            None => Ok(HashMap::new()),
            Some(Slot {
                value: Value::Hash(map),
                ..
            }) => Ok(map.clone()),
            Some(slot) => Err(wrong_type(key, &slot.value)),
        }
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        let merged = match keyspace.live(key) {
            None => fields,
            Some(Slot {
                value: Value::Hash(existing),
                ..
            }) => {
                let mut merged = existing.clone();
                merged.extend(fields);
                merged
            }
            Some(slot) => return Err(wrong_type(key, &slot.value)),
        };
        keyspace.put(key, Value::Hash(merged), ttl);
        Ok(())
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        if keyspace.get_str(key)?.as_deref() == Some(expected) {
            keyspace.slots.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn admit(
        &self,
        request: AdmissionRequest,
    ) -> Result<AdmissionCode> {
        self.check_available()?;
        let AdmissionRequest {
            stock_key,
            order_key,
            member,
            stream,
            fields,
        } = request;

        let id = {
            let mut keyspace = self.keyspace.lock();

            if keyspace.is_member(&order_key, &member)? {
                return Ok(AdmissionCode::AlreadyPurchased);
            }

            let stock = match keyspace.get_str(&stock_key)? {
                Some(raw) => parse_stock(&stock_key, &raw)?,
                None => 0,
            };
            if stock <= 0 {
                return Ok(AdmissionCode::OutOfStock);
            }

            keyspace.incr_by(&stock_key, -1)?;
            keyspace.add_member(&order_key, &member)?;
            Self::append(&mut keyspace, &stream, fields)
        };

        debug!("admitted {member} via {stock_key}, queued as {id}");
        self.notifier(&stream).notify_waiters();
        Ok(AdmissionCode::Admitted)
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<()> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        keyspace
            .stream_mut(stream)
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn xadd(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId> {
        self.check_available()?;
        let id = {
            let mut keyspace = self.keyspace.lock();
            Self::append(&mut keyspace, stream, fields)
        };
        self.notifier(stream).notify_waiters();
        Ok(id)
    }

    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = block.map(|d| Instant::now() + d);
        let notify = self.notifier(stream);

        loop {
            // Registered before the read so an append in between is not missed.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_available()?;
            let delivered = {
                let mut keyspace = self.keyspace.lock();
                let entry = keyspace
                    .streams
                    .get_mut(stream)
                    .ok_or_else(|| no_group(stream, group))?;
                match from {
                    ReadFrom::New => entry.deliver_new(group, consumer, count),
                    ReadFrom::Pending => entry.deliver_pending(group, consumer, count),
                }
                .ok_or_else(|| no_group(stream, group))?
            };

            if !delivered.is_empty() || from == ReadFrom::Pending {
                return Ok(delivered);
            }
            let Some(deadline) = deadline else {
                return Ok(delivered);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn xack(
        &self,
        stream: &str,
        group: &str,
        ids: &[StreamId],
    ) -> Result<u64> {
        self.check_available()?;
        let mut keyspace = self.keyspace.lock();
        let group_state = keyspace
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| no_group(stream, group))?;

        let acked = ids
            .iter()
            .filter(|id| group_state.pending.remove(*id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn xpending_count(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize> {
        self.check_available()?;
        let keyspace = self.keyspace.lock();
        let group_state = keyspace
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| no_group(stream, group))?;
        Ok(group_state
            .pending
            .values()
            .filter(|p| p.consumer == consumer)
            .count())
    }
}
