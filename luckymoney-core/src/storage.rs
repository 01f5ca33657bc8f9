//! Bucketed key-value engine on top of RocksDB
//!
//! Data lives in nested *buckets* addressed by a chain of byte segments, in
//! the style of a B+tree store with nested buckets, but backed by a single
//! RocksDB column family.
//!
//! # Key layout
//!
//! Every segment is written with an order-preserving escape encoding
//! (`0x00` → `0x00 0xFF`, terminated by `0x00 0x01`). A bucket's own key is
//! the concatenation of its encoded path; a child's key is the bucket key
//! followed by the encoded child name. The children of one bucket are
//! therefore contiguous and sorted by raw name bytes.
//!
//! Stored slots are tagged:
//!
//! - `0x01 || bytes` - plain value
//! - `0x02 || u64 (BE)` - nested bucket marker carrying the bucket sequence
//!
//! # Transactions
//!
//! - [`Store::view`] runs against a RocksDB snapshot. Readers never block the
//!   writer and are never blocked by it.
//! - [`Store::update`] takes the single writer lock, buffers writes (reads see
//!   them) and commits them as one `WriteBatch`. Returning `Err` from the
//!   closure discards every buffered write.

use crate::{
    error::{Error, Result},
    types::Page,
    Config,
};
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, Snapshot,
    WriteBatch, WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

/// Column family holding every bucket
const CF_BUCKETS: &str = "buckets";

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

const TAG_VALUE: u8 = 0x01;
const TAG_BUCKET: u8 = 0x02;

/// Backup stream header
const BACKUP_MAGIC: &[u8; 8] = b"LMSNAP01";
/// Key length marking the end of a backup stream
const BACKUP_END: u32 = u32::MAX;

/// Address of a bucket: a chain of byte segments from the root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketPath {
    segments: Vec<Vec<u8>>,
}

impl BucketPath {
    /// Path with a single top-level segment
    pub fn root(name: impl AsRef<[u8]>) -> Self {
        Self {
            segments: vec![name.as_ref().to_vec()],
        }
    }

    /// Append a segment
    pub fn join(mut self, segment: impl AsRef<[u8]>) -> Self {
        self.segments.push(segment.as_ref().to_vec());
        self
    }

    /// Raw segments
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// True for the empty path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for BucketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<empty>");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write_segment(f, segment)?;
        }
        Ok(())
    }
}

fn write_segment(f: &mut fmt::Formatter<'_>, segment: &[u8]) -> fmt::Result {
    match std::str::from_utf8(segment) {
        Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "{}", s),
        _ => {
            write!(f, "0x")?;
            for b in segment {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

/// Handle to an existing bucket, valid for the transaction that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    key: Vec<u8>,
}

impl Bucket {
    fn child_key(&self, name: &[u8]) -> Vec<u8> {
        let mut key = self.key.clone();
        encode_segment(&mut key, name);
        key
    }
}

/// Direct child of a bucket, as seen by iteration
#[derive(Debug)]
pub enum Child {
    /// Plain value
    Value(Vec<u8>),
    /// Nested bucket
    Bucket(Bucket),
}

/// Iteration order over a bucket's children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending key order
    Ascending,
    /// Descending key order
    Descending,
}

impl Order {
    /// `Descending` when `reverse` is set
    pub fn from_reverse(reverse: bool) -> Self {
        if reverse {
            Order::Descending
        } else {
            Order::Ascending
        }
    }
}

enum Slot {
    Value(Vec<u8>),
    Bucket(u64),
}

fn encode_segment(out: &mut Vec<u8>, segment: &[u8]) {
    for &b in segment {
        if b == ESCAPE {
            out.extend_from_slice(&[ESCAPE, ESCAPED_NUL]);
        } else {
            out.push(b);
        }
    }
    out.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

/// Decode one segment, returning it with the number of bytes consumed
fn decode_segment(input: &[u8]) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == ESCAPE {
            match input.get(i + 1) {
                Some(&TERMINATOR) => return Some((out, i + 2)),
                Some(&ESCAPED_NUL) => {
                    out.push(0);
                    i += 2;
                }
                _ => return None,
            }
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    None
}

/// Human-readable form of an encoded key
fn describe(key: &[u8]) -> String {
    let mut path = BucketPath::default();
    let mut rest = key;
    while !rest.is_empty() {
        match decode_segment(rest) {
            Some((segment, used)) => {
                path = path.join(segment);
                rest = &rest[used..];
            }
            None => return format!("{}/<corrupt>", path),
        }
    }
    path.to_string()
}

fn decode_slot(key: &[u8], raw: &[u8]) -> Result<Slot> {
    match raw.split_first() {
        Some((&TAG_VALUE, data)) => Ok(Slot::Value(data.to_vec())),
        Some((&TAG_BUCKET, seq)) => {
            let bytes: [u8; 8] = seq
                .try_into()
                .map_err(|_| Error::Storage(format!("Corrupt bucket marker at {}", describe(key))))?;
            Ok(Slot::Bucket(u64::from_be_bytes(bytes)))
        }
        _ => Err(Error::Storage(format!("Corrupt entry at {}", describe(key)))),
    }
}

fn value_slot(data: &[u8]) -> Vec<u8> {
    let mut slot = Vec::with_capacity(data.len() + 1);
    slot.push(TAG_VALUE);
    slot.extend_from_slice(data);
    slot
}

fn bucket_slot(sequence: u64) -> Vec<u8> {
    let mut slot = Vec::with_capacity(9);
    slot.push(TAG_BUCKET);
    slot.extend_from_slice(&sequence.to_be_bytes());
    slot
}

/// Smallest key greater than every key starting with `prefix`
fn upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    end
}

/// Read operations shared by reader and writer transactions
pub trait KvRead {
    /// Raw slot lookup by encoded key
    fn get_slot(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Get the bucket at `path` if every segment exists as a bucket.
    ///
    /// `Ok(None)` means "missing" and must be read as empty state.
    fn bucket(&self, path: &BucketPath) -> Result<Option<Bucket>> {
        if path.is_empty() {
            return Err(Error::NoContainer(path.to_string()));
        }

        let mut key = Vec::new();
        for segment in path.segments() {
            encode_segment(&mut key, segment);
            match self.get_slot(&key)? {
                Some(raw) => {
                    if let Slot::Value(_) = decode_slot(&key, &raw)? {
                        return Ok(None);
                    }
                }
                None => return Ok(None),
            }
        }

        Ok(Some(Bucket { key }))
    }

    /// Like [`KvRead::bucket`], but a missing path is an error
    fn require_bucket(&self, path: &BucketPath) -> Result<Bucket> {
        self.bucket(path)?
            .ok_or_else(|| Error::NoContainer(path.to_string()))
    }

    /// Value stored under `key`; nested buckets read as `None`
    fn get(&self, bucket: &Bucket, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let full = bucket.child_key(key);
        match self.get_slot(&full)? {
            Some(raw) => match decode_slot(&full, &raw)? {
                Slot::Value(data) => Ok(Some(data)),
                Slot::Bucket(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Decode a bincode record stored under `key`
    fn get_record<T: DeserializeOwned>(&self, bucket: &Bucket, key: &[u8]) -> Result<Option<T>> {
        match self.get(bucket, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// True if a value is stored under `key`
    fn contains(&self, bucket: &Bucket, key: &[u8]) -> Result<bool> {
        Ok(self.get(bucket, key)?.is_some())
    }

    /// Current sequence of the bucket
    fn sequence(&self, bucket: &Bucket) -> Result<u64> {
        match self.get_slot(&bucket.key)? {
            Some(raw) => match decode_slot(&bucket.key, &raw)? {
                Slot::Bucket(sequence) => Ok(sequence),
                Slot::Value(_) => Err(Error::IncompatibleValue(describe(&bucket.key))),
            },
            None => Err(Error::NoContainer(describe(&bucket.key))),
        }
    }
}

/// Reader transaction over a point-in-time snapshot
pub struct ReadTxn<'a> {
    snapshot: Snapshot<'a>,
    cf: Arc<BoundColumnFamily<'a>>,
}

impl fmt::Debug for ReadTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadTxn").finish_non_exhaustive()
    }
}

impl KvRead for ReadTxn<'_> {
    fn get_slot(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get_cf(&self.cf, key)?)
    }
}

impl ReadTxn<'_> {
    /// Visit the direct children of `bucket` in key order.
    ///
    /// Starts at `start` (inclusive) when given. The visitor stops the scan
    /// by returning `ControlFlow::Break`.
    pub fn for_each_child<F>(
        &self,
        bucket: &Bucket,
        start: Option<&[u8]>,
        order: Order,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], Child) -> Result<ControlFlow<()>>,
    {
        let prefix = bucket.key.as_slice();
        let seek = match (start, order) {
            (Some(name), _) => bucket.child_key(name),
            (None, Order::Ascending) => prefix.to_vec(),
            (None, Order::Descending) => upper_bound(prefix),
        };
        let mode = match order {
            Order::Ascending => IteratorMode::From(&seek, Direction::Forward),
            Order::Descending if seek.is_empty() => IteratorMode::End,
            Order::Descending => IteratorMode::From(&seek, Direction::Reverse),
        };

        for item in self.snapshot.iterator_cf(&self.cf, mode) {
            let (key, raw) = item?;

            if !key.starts_with(prefix) {
                break;
            }
            if key.len() == prefix.len() {
                // The bucket's own marker bounds the range from below
                match order {
                    Order::Ascending => continue,
                    Order::Descending => break,
                }
            }

            let rest = &key[prefix.len()..];
            let (name, used) = decode_segment(rest)
                .ok_or_else(|| Error::Storage(format!("Corrupt key under {}", describe(prefix))))?;
            if used != rest.len() {
                // Entry of a nested bucket
                continue;
            }

            let child = match decode_slot(&key, &raw)? {
                Slot::Value(data) => Child::Value(data),
                Slot::Bucket(_) => Child::Bucket(Bucket { key: key.to_vec() }),
            };
            if visit(&name, child)?.is_break() {
                break;
            }
        }

        Ok(())
    }

    /// Number of direct children
    pub fn len(&self, bucket: &Bucket) -> Result<usize> {
        let mut count = 0;
        self.for_each_child(bucket, None, Order::Ascending, |_, _| {
            count += 1;
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(count)
    }

    /// Decode one page of direct children after skipping `offset` of them.
    ///
    /// An offset past the end (or a zero limit) yields an empty page that
    /// still reports the total.
    pub fn page<T, F>(
        &self,
        bucket: &Bucket,
        offset: usize,
        limit: usize,
        order: Order,
        mut decode: F,
    ) -> Result<Page<T>>
    where
        F: FnMut(&[u8], Child) -> Result<T>,
    {
        let total = self.len(bucket)?;
        if offset >= total || limit == 0 {
            return Ok(Page::empty(total));
        }

        let mut items = Vec::with_capacity(limit.min(total - offset));
        let mut skipped = 0;
        self.for_each_child(bucket, None, order, |name, child| {
            if skipped < offset {
                skipped += 1;
                return Ok(ControlFlow::Continue(()));
            }
            items.push(decode(name, child)?);
            if items.len() >= limit {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })?;

        Ok(Page { items, total })
    }
}

/// Writer transaction; holds the single writer lock until dropped
pub struct WriteTxn<'a> {
    db: &'a DB,
    cf: Arc<BoundColumnFamily<'a>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    _writer: MutexGuard<'a, ()>,
}

impl fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTxn")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl KvRead for WriteTxn<'_> {
    fn get_slot(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.db.get_cf(&self.cf, key)?)
    }
}

impl WriteTxn<'_> {
    /// Get the bucket at `path`, creating every missing segment.
    ///
    /// Fails with `IncompatibleValue` when a segment already holds a value.
    pub fn ensure_bucket(&mut self, path: &BucketPath) -> Result<Bucket> {
        if path.is_empty() {
            return Err(Error::NoContainer(path.to_string()));
        }

        let mut key = Vec::new();
        for segment in path.segments() {
            encode_segment(&mut key, segment);
            match self.get_slot(&key)? {
                Some(raw) => {
                    if let Slot::Value(_) = decode_slot(&key, &raw)? {
                        return Err(Error::IncompatibleValue(path.to_string()));
                    }
                }
                None => {
                    self.pending.insert(key.clone(), Some(bucket_slot(0)));
                }
            }
        }

        Ok(Bucket { key })
    }

    /// Store a value; fails if `key` names a nested bucket
    pub fn put(&mut self, bucket: &Bucket, key: &[u8], value: &[u8]) -> Result<()> {
        let full = bucket.child_key(key);
        self.reject_bucket_slot(&full)?;
        self.pending.insert(full, Some(value_slot(value)));
        Ok(())
    }

    /// Store a bincode record
    pub fn put_record<T: Serialize>(&mut self, bucket: &Bucket, key: &[u8], record: &T) -> Result<()> {
        let bytes = bincode::serialize(record)?;
        self.put(bucket, key, &bytes)
    }

    /// Remove a value. Returns whether one was present.
    pub fn delete(&mut self, bucket: &Bucket, key: &[u8]) -> Result<bool> {
        let full = bucket.child_key(key);
        let existed = self.reject_bucket_slot(&full)?;
        if existed {
            self.pending.insert(full, None);
        }
        Ok(existed)
    }

    /// Increment and return the bucket sequence
    pub fn next_sequence(&mut self, bucket: &Bucket) -> Result<u64> {
        let next = self
            .sequence(bucket)?
            .checked_add(1)
            .ok_or_else(|| Error::Storage(format!("Sequence overflow at {}", describe(&bucket.key))))?;
        self.pending.insert(bucket.key.clone(), Some(bucket_slot(next)));
        Ok(next)
    }

    /// Overwrite the bucket sequence
    pub fn set_sequence(&mut self, bucket: &Bucket, sequence: u64) -> Result<()> {
        // Validates that the bucket exists
        self.sequence(bucket)?;
        self.pending.insert(bucket.key.clone(), Some(bucket_slot(sequence)));
        Ok(())
    }

    /// Returns whether a value is present at `full`; errors on a bucket
    fn reject_bucket_slot(&self, full: &[u8]) -> Result<bool> {
        match self.get_slot(full)? {
            Some(raw) => match decode_slot(full, &raw)? {
                Slot::Bucket(_) => Err(Error::IncompatibleValue(describe(full))),
                Slot::Value(_) => Ok(true),
            },
            None => Ok(false),
        }
    }

    fn commit(self, sync: bool) -> Result<usize> {
        let writes = self.pending.len();
        if writes == 0 {
            return Ok(0);
        }

        let mut batch = WriteBatch::default();
        for (key, value) in &self.pending {
            match value {
                Some(slot) => batch.put_cf(&self.cf, key, slot),
                None => batch.delete_cf(&self.cf, key),
            }
        }

        let mut opts = WriteOptions::default();
        opts.set_sync(sync);

        // Atomic commit
        self.db.write_opt(batch, &opts)?;

        Ok(writes)
    }
}

/// Single-writer, multi-reader bucket store
pub struct Store {
    db: DB,
    writer: Mutex<()>,
    sync_writes: bool,
    path: PathBuf,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("sync_writes", &self.sync_writes)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_BUCKETS,
            Self::cf_options_buckets(),
        )];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "Opened bucket store");

        Ok(Self {
            db,
            writer: Mutex::new(()),
            sync_writes: config.rocksdb.sync_writes,
            path: path.clone(),
        })
    }

    fn cf_options_buckets() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups dominate (claims, balance checks)
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(CF_BUCKETS)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_BUCKETS)))
    }

    /// Data directory
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Run a reader transaction
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTxn<'_>) -> Result<T>,
    {
        let txn = ReadTxn {
            snapshot: self.db.snapshot(),
            cf: self.cf_handle()?,
        };
        f(&txn)
    }

    /// Run a writer transaction; all writes commit together or not at all
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    {
        let guard = self.writer.lock();
        let mut txn = WriteTxn {
            db: &self.db,
            cf: self.cf_handle()?,
            pending: BTreeMap::new(),
            _writer: guard,
        };

        let output = f(&mut txn)?;
        let writes = txn.commit(self.sync_writes)?;

        tracing::trace!(writes, "Writer transaction committed");

        Ok(output)
    }

    /// Stream a point-in-time copy of the database. Returns bytes written.
    pub fn backup<W: Write>(&self, writer: W) -> Result<u64> {
        let mut out = CountingWriter::new(writer);
        let snapshot = self.db.snapshot();
        let cf = self.cf_handle()?;

        out.write_all(BACKUP_MAGIC)?;

        let mut records = 0u64;
        for item in snapshot.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            write_frame(&mut out, &key)?;
            write_frame(&mut out, &value)?;
            records += 1;
        }

        out.write_all(&BACKUP_END.to_be_bytes())?;
        out.write_all(&records.to_be_bytes())?;
        out.flush()?;

        tracing::info!(records, bytes = out.written, "Database snapshot exported");

        Ok(out.written)
    }

    /// Load a stream produced by [`Store::backup`] into an empty store.
    /// Returns the number of records restored.
    pub fn restore<R: Read>(&self, mut reader: R) -> Result<u64> {
        let _guard = self.writer.lock();
        let cf = self.cf_handle()?;

        if self.db.iterator_cf(&cf, IteratorMode::Start).next().is_some() {
            return Err(Error::Storage("Restore target is not empty".to_string()));
        }

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != BACKUP_MAGIC {
            return Err(Error::Storage("Not a bucket store backup".to_string()));
        }

        let mut batch = WriteBatch::default();
        let mut records = 0u64;
        loop {
            let key = match read_frame(&mut reader)? {
                Some(key) => key,
                None => break,
            };
            let value = read_frame(&mut reader)?
                .ok_or_else(|| Error::Storage("Backup truncated inside a record".to_string()))?;
            batch.put_cf(&cf, key, value);
            records += 1;
        }

        let mut count = [0u8; 8];
        reader.read_exact(&mut count)?;
        if u64::from_be_bytes(count) != records {
            return Err(Error::Storage(format!(
                "Backup record count mismatch: trailer {}, read {}",
                u64::from_be_bytes(count),
                records
            )));
        }

        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &opts)?;

        tracing::info!(records, "Database snapshot restored");

        Ok(records)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("Bucket store closed");
        Ok(())
    }
}

fn write_frame<W: Write>(out: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len != BACKUP_END)
        .ok_or_else(|| Error::Storage("Record too large for backup frame".to_string()))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(bytes)?;
    Ok(())
}

/// `None` at the end marker
fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len);
    if len == BACKUP_END {
        return Ok(None);
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(Some(bytes))
}

struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
