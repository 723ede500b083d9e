//! Storage substrate
//!
//! The layer above only needs a key-value store with links:
//!
//! - records (action + entry), addressable by action hash or entry hash
//! - typed links from a base address, read back in write order
//! - a clock issuing strictly increasing [`Tick`]s
//! - atomic commit of a [`WriteBatch`]
//!
//! Two backends ship with the crate: [`MemoryStore`] for tests and embedding,
//! and [`SledStore`] for a durable single-node store.

use crate::entry::{Link, LinkType, Record, Tick};
use crate::error::{CoopError, CoopResult};
use crate::hash::{Address, ADDRESS_LEN};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Writes that must land together or not at all
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub records: Vec<Record>,
    pub links: Vec<Link>,
    /// Commit fails with `Conflict` if any of these bases already has a link
    /// of the given type
    pub require_no_links: Vec<(Address, LinkType)>,
}

impl WriteBatch {
    pub fn put_record(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn put_link(&mut self, link: Link) {
        self.links.push(link);
    }

    pub fn require_no_links(&mut self, base: Address, link_type: LinkType) {
        self.require_no_links.push((base, link_type));
    }

    /// Whether the batch already writes this entry
    pub fn has_entry(&self, entry_hash: &Address) -> bool {
        self.records.iter().any(|r| r.entry_hash() == entry_hash)
    }

    /// Whether the batch already writes an equivalent link
    pub fn has_link(&self, base: &Address, target: &Address, link_type: LinkType, tag: &[u8]) -> bool {
        self.links
            .iter()
            .any(|l| &l.base == base && l.same_edge(target, link_type, tag))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.links.is_empty()
    }
}

/// Key-value-with-links store the group and content layers run on
pub trait Store: Send + Sync {
    /// Issue the next write position
    fn tick(&self) -> CoopResult<Tick>;

    /// Look up a record by action hash or entry hash.
    ///
    /// For an entry written more than once, the first write is returned.
    fn get_record(&self, address: &Address) -> CoopResult<Option<Record>>;

    fn entry_exists(&self, entry_hash: &Address) -> CoopResult<bool> {
        Ok(self.get_record(entry_hash)?.is_some())
    }

    /// Links of one type from a base, ordered by tick
    fn get_links(&self, base: &Address, link_type: LinkType) -> CoopResult<Vec<Link>>;

    /// Links of several types from several bases, ordered by tick.
    ///
    /// Every base and type is read from one view: no commit lands part way
    /// through. This default reads base by base and is only consistent for
    /// stores without concurrent writers.
    fn get_links_many(&self, bases: &[Address], link_types: &[LinkType]) -> CoopResult<Vec<Link>> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for base in bases.iter().filter(|base| seen.insert(*base)) {
            for link_type in link_types {
                links.extend(self.get_links(base, *link_type)?);
            }
        }
        Ok(sorted(links))
    }

    /// Apply every write in the batch atomically
    fn commit(&self, batch: WriteBatch) -> CoopResult<()>;
}

/// Monotonic clock: wall-clock microseconds, bumped past the last tick
#[derive(Debug)]
pub struct Clock {
    last: Mutex<Tick>,
}

impl Clock {
    pub fn new() -> Self {
        Self::resume(Tick { timestamp: 0, seq: 0 })
    }

    /// Continue after a previously issued tick
    pub fn resume(last: Tick) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }

    pub fn next(&self) -> Tick {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = chrono::Utc::now().timestamp_micros();
        let tick = Tick {
            timestamp: now.max(last.timestamp + 1),
            seq: last.seq + 1,
        };
        *last = tick;
        tick
    }

    pub fn last(&self) -> Tick {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

fn conflict_on(existing: &Link) -> CoopError {
    CoopError::Conflict {
        base: existing.base.clone(),
        head: existing.target.clone(),
    }
}

// =============================================================================
// Memory backend
// =============================================================================

#[derive(Default)]
struct MemoryState {
    records: HashMap<Address, Record>,
    entries: HashMap<Address, Address>,
    links: HashMap<(Address, LinkType), Vec<Link>>,
}

/// In-process store, everything behind one lock
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    clock: Clock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub fn record_count(&self) -> usize {
        self.read().records.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn sorted(mut links: Vec<Link>) -> Vec<Link> {
    links.sort_by_key(|l| l.tick);
    links
}

impl Store for MemoryStore {
    fn tick(&self) -> CoopResult<Tick> {
        Ok(self.clock.next())
    }

    fn get_record(&self, address: &Address) -> CoopResult<Option<Record>> {
        let state = self.read();
        let action = state.entries.get(address).unwrap_or(address);
        Ok(state.records.get(action).cloned())
    }

    fn get_links(&self, base: &Address, link_type: LinkType) -> CoopResult<Vec<Link>> {
        let state = self.read();
        let links = state
            .links
            .get(&(base.clone(), link_type))
            .cloned()
            .unwrap_or_default();
        Ok(sorted(links))
    }

    fn get_links_many(&self, bases: &[Address], link_types: &[LinkType]) -> CoopResult<Vec<Link>> {
        let state = self.read();
        let mut seen = HashSet::new();
        let links = bases
            .iter()
            .filter(|base| seen.insert(*base))
            .flat_map(|base| link_types.iter().map(move |link_type| (base.clone(), *link_type)))
            .filter_map(|key| state.links.get(&key))
            .flatten()
            .cloned()
            .collect();
        Ok(sorted(links))
    }

    fn commit(&self, batch: WriteBatch) -> CoopResult<()> {
        let mut state = self.write();

        for (base, link_type) in &batch.require_no_links {
            if let Some(existing) = state
                .links
                .get(&(base.clone(), *link_type))
                .and_then(|links| links.first())
            {
                return Err(conflict_on(existing));
            }
        }

        debug!(
            records = batch.records.len(),
            links = batch.links.len(),
            "Committing batch"
        );

        for record in batch.records {
            state
                .entries
                .entry(record.entry_hash().clone())
                .or_insert_with(|| record.action_hash.clone());
            state.records.insert(record.action_hash.clone(), record);
        }
        for link in batch.links {
            state
                .links
                .entry((link.base.clone(), link.link_type))
                .or_default()
                .push(link);
        }
        Ok(())
    }
}

// =============================================================================
// Sled backend
// =============================================================================

const RECORD_PREFIX: &[u8] = b"r/";
const ENTRY_PREFIX: &[u8] = b"e/";
const LINK_PREFIX: &[u8] = b"l/";
const CLOCK_KEY: &[u8] = b"m/clock";

fn key(prefix: &[u8], address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + ADDRESS_LEN);
    key.extend_from_slice(prefix);
    key.extend_from_slice(address.as_bytes());
    key
}

fn link_type_byte(link_type: LinkType) -> u8 {
    match link_type {
        LinkType::AgentToGroup => 0,
        LinkType::GroupEvolution => 1,
        LinkType::GroupAuth => 2,
        LinkType::GroupAuthArchive => 3,
        LinkType::Content => 4,
        LinkType::ContentUpdate => 5,
    }
}

fn link_scan_prefix(base: &Address, link_type: LinkType) -> Vec<u8> {
    let mut key = key(LINK_PREFIX, base);
    key.push(link_type_byte(link_type));
    key
}

/// `l/ base type timestamp seq action`: big-endian so a prefix scan yields
/// links in tick order
fn link_key(link: &Link) -> Vec<u8> {
    let mut key = link_scan_prefix(&link.base, link.link_type);
    key.extend_from_slice(&((link.tick.timestamp as u64) ^ (1 << 63)).to_be_bytes());
    key.extend_from_slice(&link.tick.seq.to_be_bytes());
    key.extend_from_slice(link.create_action.as_bytes());
    key
}

/// Durable store backed by a single sled tree
pub struct SledStore {
    db: sled::Db,
    clock: Clock,
    commit_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create a store at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> CoopResult<Self> {
        Self::open_with_cache(path, 64 * 1024 * 1024)
    }

    pub fn open_with_cache<P: AsRef<Path>>(path: P, cache_bytes: u64) -> CoopResult<Self> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(cache_bytes)
            .open()?;

        let last = match db.get(CLOCK_KEY)? {
            Some(bytes) => rmp_serde::from_slice(&bytes)?,
            None => Tick { timestamp: 0, seq: 0 },
        };

        info!(path = %path.as_ref().display(), last_seq = last.seq, "Opened sled store");

        Ok(Self {
            db,
            clock: Clock::resume(last),
            commit_lock: Mutex::new(()),
        })
    }

    /// Flush changes to disk
    pub fn flush(&self) -> CoopResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_link(bytes: &[u8]) -> CoopResult<Link> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Store for SledStore {
    fn tick(&self) -> CoopResult<Tick> {
        Ok(self.clock.next())
    }

    fn get_record(&self, address: &Address) -> CoopResult<Option<Record>> {
        let action = match self.db.get(key(ENTRY_PREFIX, address))? {
            Some(action_bytes) => Address::from_raw_39(&action_bytes)?,
            None => address.clone(),
        };
        match self.db.get(key(RECORD_PREFIX, &action))? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_links(&self, base: &Address, link_type: LinkType) -> CoopResult<Vec<Link>> {
        self.db
            .scan_prefix(link_scan_prefix(base, link_type))
            .map(|item| {
                let (_, value) = item?;
                Self::decode_link(&value)
            })
            .collect()
    }

    /// Scans every base while holding the commit lock, so no batch is
    /// applied between the first and the last scan
    fn get_links_many(&self, bases: &[Address], link_types: &[LinkType]) -> CoopResult<Vec<Link>> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for base in bases.iter().filter(|base| seen.insert(*base)) {
            for link_type in link_types {
                links.extend(self.get_links(base, *link_type)?);
            }
        }
        Ok(sorted(links))
    }

    fn commit(&self, batch: WriteBatch) -> CoopResult<()> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());

        for (base, link_type) in &batch.require_no_links {
            if let Some(item) = self.db.scan_prefix(link_scan_prefix(base, *link_type)).next() {
                let (_, value) = item?;
                return Err(conflict_on(&Self::decode_link(&value)?));
            }
        }

        let mut sled_batch = sled::Batch::default();
        let mut max_tick = self.clock.last();

        for record in &batch.records {
            let entry_key = key(ENTRY_PREFIX, record.entry_hash());
            if self.db.get(&entry_key)?.is_none() {
                sled_batch.insert(entry_key, record.action_hash.as_bytes().to_vec());
            }
            sled_batch.insert(
                key(RECORD_PREFIX, &record.action_hash),
                rmp_serde::to_vec(record)?,
            );
            max_tick = max_tick.max(record.action.tick);
        }
        for link in &batch.links {
            sled_batch.insert(link_key(link), rmp_serde::to_vec(link)?);
            max_tick = max_tick.max(link.tick);
        }
        sled_batch.insert(CLOCK_KEY, rmp_serde::to_vec(&max_tick)?);

        self.db.apply_batch(sled_batch)?;

        debug!(
            records = batch.records.len(),
            links = batch.links.len(),
            "Committed batch to sled"
        );
        Ok(())
    }
}
