//! Sled-backed [`SharedStore`].
//!
//! Stock counters, purchase markers, locks, sessions and the order stream
//! survive a restart of the process. Keyed values are bincode [`Record`]s
//! carrying an optional wall-clock deadline. Streams are spread over four
//! trees:
//!
//! - entries: `<stream>\0<id>` -> fields
//! - meta: `<stream>` -> last appended id
//! - groups: `<stream>\0<group>\0` -> last delivered id
//! - pending: `<stream>\0<group>\0<id>` -> owner and delivery count
//!
//! Ids are written as 16 big-endian bytes so tree order is id order.
//! Scripted operations and every write spanning trees run as sled
//! transactions. Transactions cannot scan, so stream appends and group reads
//! are also serialized by an in-process mutex; sled's file lock already
//! keeps the directory to one process.

use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::ConflictableTransactionResult;
use sled::transaction::TransactionError;
use sled::transaction::TransactionalTree;
use sled::Transactional;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::value::no_group;
use super::value::parse_stock;
use super::value::wrong_type;
use super::value::Value;
use super::AdmissionCode;
use super::AdmissionRequest;
use super::PendingEntry;
use super::ReadFrom;
use super::SharedStore;
use super::StreamEntry;
use super::StreamId;
use crate::constants::SHARED_GROUP_TREE;
use crate::constants::SHARED_KV_TREE;
use crate::constants::SHARED_PENDING_TREE;
use crate::constants::SHARED_STREAM_ENTRY_TREE;
use crate::constants::SHARED_STREAM_META_TREE;
use crate::init_sled_shared_db;
use crate::utils::time::get_now_as_millis;
use crate::Error;
use crate::Result;
use crate::StorageError;
use crate::StoreError;

type TxResult<T> = ConflictableTransactionResult<T, Error>;

/// A keyed value with its expiry in unix millis.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: Value,
    expires_at: Option<i64>,
}

impl Record {
    fn new(
        value: Value,
        ttl: Option<Duration>,
        now: i64,
    ) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| deadline(now, ttl)),
        }
    }

    fn is_expired(
        &self,
        now: i64,
    ) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn deadline(
    now: i64,
    ttl: Duration,
) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

// -
// Key layout

const SEPARATOR: u8 = 0;

/// `parts` joined and terminated by the separator.
fn scoped(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for part in parts {
        key.extend_from_slice(part.as_bytes());
        key.push(SEPARATOR);
    }
    key
}

fn with_id(
    mut prefix: Vec<u8>,
    id: StreamId,
) -> Vec<u8> {
    prefix.extend_from_slice(&id.millis.to_be_bytes());
    prefix.extend_from_slice(&id.seq.to_be_bytes());
    prefix
}

fn entry_key(
    stream: &str,
    id: StreamId,
) -> Vec<u8> {
    with_id(scoped(&[stream]), id)
}

fn pending_key(
    stream: &str,
    group: &str,
    id: StreamId,
) -> Vec<u8> {
    with_id(scoped(&[stream, group]), id)
}

/// Reads the id stored in the last 16 bytes of `key`.
fn id_suffix(
    location: &str,
    key: &[u8],
) -> Result<StreamId> {
    let corrupted = || {
        Error::Storage(StorageError::DataCorruption {
            location: location.to_string(),
        })
    };
    let start = key.len().checked_sub(16).ok_or_else(corrupted)?;
    let (millis, seq) = key[start..].split_at(8);
    Ok(StreamId::new(
        u64::from_be_bytes(millis.try_into().map_err(|_| corrupted())?),
        u64::from_be_bytes(seq.try_into().map_err(|_| corrupted())?),
    ))
}

// -
// Codec

fn decode<T: DeserializeOwned>(
    location: &str,
    bytes: &[u8],
) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| {
        warn!("failed to decode record in {location}: {e:?}");
        Error::Storage(StorageError::DataCorruption {
            location: location.to_string(),
        })
    })
}

fn abort(e: impl Into<Error>) -> ConflictableTransactionError<Error> {
    ConflictableTransactionError::Abort(e.into())
}

fn encode_tx<T: Serialize + ?Sized>(value: &T) -> TxResult<Vec<u8>> {
    bincode::serialize(value).map_err(abort)
}

fn decode_tx<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    bincode::deserialize(bytes).map_err(abort)
}

fn into_store_error(e: TransactionError<Error>) -> Error {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(StorageError::Transaction(e.to_string())),
    }
}

// -
// Keyed values inside a transaction

/// The live record under `key`; an expired one is removed first.
fn live_in_tx(
    kv: &TransactionalTree,
    key: &str,
    now: i64,
) -> TxResult<Option<Record>> {
    let Some(raw) = kv.get(key.as_bytes())? else {
        return Ok(None);
    };
    let record: Record = decode_tx(&raw)?;
    if record.is_expired(now) {
        trace!("key {key} expired");
        kv.remove(key.as_bytes())?;
        return Ok(None);
    }
    Ok(Some(record))
}

fn put_in_tx(
    kv: &TransactionalTree,
    key: &str,
    record: &Record,
) -> TxResult<()> {
    kv.insert(key.as_bytes(), encode_tx(record)?)?;
    Ok(())
}

fn get_str_in_tx(
    kv: &TransactionalTree,
    key: &str,
    now: i64,
) -> TxResult<Option<String>> {
    match live_in_tx(kv, key, now)? {
        None => Ok(None),
        Some(Record {
            value: Value::Str(s),
            ..
        }) => Ok(Some(s)),
        Some(record) => Err(abort(wrong_type(key, &record.value))),
    }
}

/// Adds `delta` to an integer string, keeping its expiry.
fn incr_in_tx(
    kv: &TransactionalTree,
    key: &str,
    delta: i64,
    now: i64,
) -> TxResult<i64> {
    let (current, expires_at) = match live_in_tx(kv, key, now)? {
        None => (0, None),
        Some(Record {
            value: Value::Str(s),
            expires_at,
        }) => {
            let current: i64 = s
                .parse()
                .map_err(|_| abort(StoreError::NotAnInteger(key.to_string())))?;
            (current, expires_at)
        }
        Some(record) => return Err(abort(wrong_type(key, &record.value))),
    };
    let next = current + delta;
    put_in_tx(
        kv,
        key,
        &Record {
            value: Value::Str(next.to_string()),
            expires_at,
        },
    )?;
    Ok(next)
}

fn is_member_in_tx(
    kv: &TransactionalTree,
    key: &str,
    member: &str,
    now: i64,
) -> TxResult<bool> {
    match live_in_tx(kv, key, now)? {
        None => Ok(false),
        Some(Record {
            value: Value::Set(set),
            ..
        }) => Ok(set.contains(member)),
        Some(record) => Err(abort(wrong_type(key, &record.value))),
    }
}

fn add_member_in_tx(
    kv: &TransactionalTree,
    key: &str,
    member: &str,
    now: i64,
) -> TxResult<()> {
    let record = match live_in_tx(kv, key, now)? {
        None => Record::new(
            Value::Set(HashSet::from([member.to_string()])),
            None,
            now,
        ),
        Some(Record {
            value: Value::Set(mut set),
            expires_at,
        }) => {
            set.insert(member.to_string());
            Record {
                value: Value::Set(set),
                expires_at,
            }
        }
        Some(record) => return Err(abort(wrong_type(key, &record.value))),
    };
    put_in_tx(kv, key, &record)
}

fn append_in_tx(
    entries: &TransactionalTree,
    meta: &TransactionalTree,
    stream: &str,
    fields: &[(String, String)],
    now: i64,
) -> TxResult<StreamId> {
    let last: StreamId = match meta.get(stream.as_bytes())? {
        Some(raw) => decode_tx(&raw)?,
        None => StreamId::ZERO,
    };
    let id = last.next_after(now.max(0) as u64);
    entries.insert(entry_key(stream, id), encode_tx(fields)?)?;
    meta.insert(stream.as_bytes(), encode_tx(&id)?)?;
    Ok(id)
}

/// Persistent [`SharedStore`] over an embedded sled database.
pub struct SledSharedStore {
    db: sled::Db,
    kv: sled::Tree,
    entries: sled::Tree,
    meta: sled::Tree,
    groups: sled::Tree,
    pending: sled::Tree,
    // stream appends and group reads
    streams: Mutex<()>,
    // wakes readers blocked on a stream
    notifiers: DashMap<String, Arc<Notify>>,
}

impl std::fmt::Debug for SledSharedStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledSharedStore")
            .field("keys", &self.kv.len())
            .field("stream_entries", &self.entries.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SledSharedStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let kv = db.open_tree(SHARED_KV_TREE)?;
        let entries = db.open_tree(SHARED_STREAM_ENTRY_TREE)?;
        let meta = db.open_tree(SHARED_STREAM_META_TREE)?;
        let groups = db.open_tree(SHARED_GROUP_TREE)?;
        let pending = db.open_tree(SHARED_PENDING_TREE)?;
        Ok(Self {
            db,
            kv,
            entries,
            meta,
            groups,
            pending,
            streams: Mutex::new(()),
            notifiers: DashMap::new(),
        })
    }

    pub fn open(db_root_dir: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let db = init_sled_shared_db(db_root_dir)?;
        Self::new(db)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Remaining time to live of `key`; `None` if missing or persistent.
    pub fn ttl(
        &self,
        key: &str,
    ) -> Result<Option<Duration>> {
        let Some(raw) = self.kv.get(key.as_bytes())? else {
            return Ok(None);
        };
        let record: Record = decode(SHARED_KV_TREE, &raw)?;
        let now = get_now_as_millis();
        Ok(record
            .expires_at
            .filter(|at| *at > now)
            .map(|at| Duration::from_millis((at - now) as u64)))
    }

    fn kv_tx<T>(
        &self,
        f: impl Fn(&TransactionalTree, i64) -> TxResult<T>,
    ) -> Result<T> {
        let now = get_now_as_millis();
        self.kv
            .transaction(|kv| f(kv, now))
            .map_err(into_store_error)
    }

    fn notifier(
        &self,
        stream: &str,
    ) -> Arc<Notify> {
        self.notifiers.entry(stream.to_string()).or_default().clone()
    }

    fn last_delivered(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<StreamId> {
        match self.groups.get(scoped(&[stream, group]))? {
            Some(raw) => decode(SHARED_GROUP_TREE, &raw),
            None => Err(no_group(stream, group)),
        }
    }

    fn deliver(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let _streams = self.streams.lock();
        match from {
            ReadFrom::New => self.deliver_new(stream, group, consumer, count),
            ReadFrom::Pending => self.deliver_pending(stream, group, consumer, count),
        }
    }

    fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let last = self.last_delivered(stream, group)?;
        let range = (
            Bound::Excluded(entry_key(stream, last)),
            Bound::Included(entry_key(stream, StreamId::new(u64::MAX, u64::MAX))),
        );

        let mut delivered = Vec::new();
        for item in self.entries.range(range).take(count) {
            let (key, raw) = item?;
            delivered.push(StreamEntry {
                id: id_suffix(SHARED_STREAM_ENTRY_TREE, &key)?,
                fields: decode(SHARED_STREAM_ENTRY_TREE, &raw)?,
                delivery_count: 1,
            });
        }
        let Some(newest) = delivered.last().map(|entry| entry.id) else {
            return Ok(delivered);
        };

        let owner = bincode::serialize(&PendingEntry {
            consumer: consumer.to_string(),
            delivery_count: 1,
        })?;
        let group_key = scoped(&[stream, group]);
        (&self.groups, &self.pending)
            .transaction(|(groups, pending)| -> TxResult<()> {
                groups.insert(group_key.as_slice(), encode_tx(&newest)?)?;
                for entry in &delivered {
                    pending.insert(pending_key(stream, group, entry.id), owner.clone())?;
                }
                Ok(())
            })
            .map_err(into_store_error)?;
        Ok(delivered)
    }

    fn deliver_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        self.last_delivered(stream, group)?;

        let mut delivered = Vec::new();
        let mut redelivered = sled::Batch::default();
        for item in self.pending.scan_prefix(scoped(&[stream, group])) {
            if delivered.len() >= count {
                break;
            }
            let (key, raw) = item?;
            let mut owner: PendingEntry = decode(SHARED_PENDING_TREE, &raw)?;
            if owner.consumer != consumer {
                continue;
            }
            let id = id_suffix(SHARED_PENDING_TREE, &key)?;
            let Some(fields) = self.entries.get(entry_key(stream, id))? else {
                continue;
            };

            owner.delivery_count += 1;
            delivered.push(StreamEntry {
                id,
                fields: decode(SHARED_STREAM_ENTRY_TREE, &fields)?,
                delivery_count: owner.delivery_count,
            });
            redelivered.insert(key, bincode::serialize(&owner)?);
        }
        self.pending.apply_batch(redelivered)?;
        Ok(delivered)
    }
}

#[async_trait]
impl SharedStore for SledSharedStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        self.kv_tx(|kv, now| get_str_in_tx(kv, key, now))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.kv_tx(|kv, now| {
            put_in_tx(
                kv,
                key,
                &Record::new(Value::Str(value.to_string()), ttl, now),
            )
        })
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.kv_tx(|kv, now| {
            if live_in_tx(kv, key, now)?.is_some() {
                return Ok(false);
            }
            put_in_tx(
                kv,
                key,
                &Record::new(Value::Str(value.to_string()), Some(ttl), now),
            )?;
            Ok(true)
        })
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        self.kv_tx(|kv, now| {
            let existed = live_in_tx(kv, key, now)?.is_some();
            kv.remove(key.as_bytes())?;
            Ok(existed)
        })
    }

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.kv_tx(|kv, now| match live_in_tx(kv, key, now)? {
            Some(mut record) => {
                record.expires_at = Some(deadline(now, ttl));
                put_in_tx(kv, key, &record)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn incr(
        &self,
        key: &str,
    ) -> Result<i64> {
        self.kv_tx(|kv, now| incr_in_tx(kv, key, 1, now))
    }

    async fn hget_all(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>> {
        self.kv_tx(|kv, now| match live_in_tx(kv, key, now)? {
            None => Ok(HashMap::new()),
            Some(Record {
                value: Value::Hash(map),
                ..
            }) => Ok(map),
            Some(record) => Err(abort(wrong_type(key, &record.value))),
        })
    }

    async fn hset_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.kv_tx(|kv, now| {
            let merged = match live_in_tx(kv, key, now)? {
                None => fields.clone(),
                Some(Record {
                    value: Value::Hash(mut existing),
                    ..
                }) => {
                    existing.extend(fields.clone());
                    existing
                }
                Some(record) => return Err(abort(wrong_type(key, &record.value))),
            };
            put_in_tx(kv, key, &Record::new(Value::Hash(merged), ttl, now))
        })
    }

    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool> {
        self.kv_tx(|kv, now| {
            if get_str_in_tx(kv, key, now)?.as_deref() == Some(expected) {
                kv.remove(key.as_bytes())?;
                return Ok(true);
            }
            Ok(false)
        })
    }

    async fn admit(
        &self,
        request: AdmissionRequest,
    ) -> Result<AdmissionCode> {
        let AdmissionRequest {
            stock_key,
            order_key,
            member,
            stream,
            fields,
        } = request;
        let now = get_now_as_millis();

        let (code, id) = {
            let _streams = self.streams.lock();
            (&self.kv, &self.entries, &self.meta)
                .transaction(
                    |(kv, entries, meta)| -> TxResult<(AdmissionCode, Option<StreamId>)> {
                        if is_member_in_tx(kv, &order_key, &member, now)? {
                            return Ok((AdmissionCode::AlreadyPurchased, None));
                        }

                        let stock = match get_str_in_tx(kv, &stock_key, now)? {
                            Some(raw) => parse_stock(&stock_key, &raw).map_err(abort)?,
                            None => 0,
                        };
                        if stock <= 0 {
                            return Ok((AdmissionCode::OutOfStock, None));
                        }

                        incr_in_tx(kv, &stock_key, -1, now)?;
                        add_member_in_tx(kv, &order_key, &member, now)?;
                        let id = append_in_tx(entries, meta, &stream, &fields, now)?;
                        Ok((AdmissionCode::Admitted, Some(id)))
                    },
                )
                .map_err(into_store_error)?
        };

        if let Some(id) = id {
            debug!("admitted {member} via {stock_key}, queued as {id}");
            self.notifier(&stream).notify_waiters();
        }
        Ok(code)
    }

    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<()> {
        let _streams = self.streams.lock();
        let key = scoped(&[stream, group]);
        if self.groups.get(&key)?.is_none() {
            self.groups
                .insert(key, bincode::serialize(&StreamId::ZERO)?)?;
        }
        Ok(())
    }

    async fn xadd(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId> {
        let now = get_now_as_millis();
        let id = {
            let _streams = self.streams.lock();
            (&self.entries, &self.meta)
                .transaction(|(entries, meta)| append_in_tx(entries, meta, stream, &fields, now))
                .map_err(into_store_error)?
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
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivered = self.deliver(stream, group, consumer, from, count)?;
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
        let _streams = self.streams.lock();
        self.last_delivered(stream, group)?;
        self.pending
            .transaction(|pending| -> TxResult<u64> {
                let mut acked = 0;
                for id in ids {
                    if pending.remove(pending_key(stream, group, *id))?.is_some() {
                        acked += 1;
                    }
                }
                Ok(acked)
            })
            .map_err(into_store_error)
    }

    async fn xpending_count(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize> {
        self.last_delivered(stream, group)?;
        let mut owned = 0;
        for item in self.pending.scan_prefix(scoped(&[stream, group])) {
            let (_, raw) = item?;
            let owner: PendingEntry = decode(SHARED_PENDING_TREE, &raw)?;
            if owner.consumer == consumer {
                owned += 1;
            }
        }
        Ok(owned)
    }
}
