//! Module `vbucket` implement one virtual-partition of a bucket.
//!
//! A vbucket is an ordered key/value store with a state machine bolted
//! on. Writes funnel through the underlying [llrb] index one at a time,
//! reads and visitors work off copy-on-write snapshots. The legal state
//! transitions:
//!
//! ```text
//! Pending -> Active | Replica | Dead
//! Active  -> Replica | Dead
//! Replica -> Active  | Dead
//! Dead    -> (none, the vbucket is garbage-collected)
//! ```
//!
//! The dispatcher upstream rejects data opcodes against anything other
//! than an Active vbucket, refer [crate::Handler].

use log::debug;

use std::{
    convert::TryFrom,
    fmt,
    ops::Bound,
    result, str,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst},
    time,
};

use crate::{
    db::Footprint,
    llrb,
    mc::{McRequest, McResponse, Opcode, Status},
    util::Spinlock,
    Error, Result,
};

/// Number of vbuckets a bucket can be configured upto.
pub const MAX_VBUCKETS: u16 = 1024;

// fixed per-item header charged to the footprint, over and above
// key and value bytes: flags 4, expiration 4, cas 8, key-len 2.
pub(crate) const ITEM_OVERHEAD: usize = 18;

// expirations beyond this many seconds are absolute timestamps.
const MAX_EXP_OFFSET: u32 = 60 * 60 * 24 * 30;

/// Map `key` to its virtual-partition, deterministic for a given
/// `num_partitions`. The client side of the binary protocol computes
/// the same mapping.
pub fn vbucket_id_for_key(key: &[u8], num_partitions: u16) -> u16 {
    let crc = crc32fast::hash(key);
    (((crc >> 16) & 0x7fff) as u16) % num_partitions
}

/// Normalize the expiration field of a write. Offsets upto 30 days are
/// relative to `now`, anything larger is an absolute timestamp, ZERO
/// means never.
pub fn compute_exp<F>(exp: u32, now: F) -> u32
where
    F: Fn() -> time::SystemTime,
{
    if exp > 0 && exp <= MAX_EXP_OFFSET {
        unix_seconds(now()).saturating_add(exp)
    } else {
        exp
    }
}

fn unix_seconds(t: time::SystemTime) -> u32 {
    match t.duration_since(time::UNIX_EPOCH) {
        Ok(d) => u32::try_from(d.as_secs()).unwrap_or(u32::MAX),
        Err(_) => 0,
    }
}

/// State of a virtual-partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VBState {
    Active,
    Replica,
    Pending,
    Dead,
}

impl VBState {
    fn is_legal_transition(&self, next: VBState) -> bool {
        use VBState::*;

        match (self, next) {
            (Pending, Active) | (Pending, Replica) | (Pending, Dead) => true,
            (Active, Replica) | (Active, Dead) => true,
            (Replica, Active) | (Replica, Dead) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VBState {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let s = match self {
            VBState::Active => "active",
            VBState::Replica => "replica",
            VBState::Pending => "pending",
            VBState::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

impl str::FromStr for VBState {
    type Err = Error;

    fn from_str(s: &str) -> Result<VBState> {
        match s {
            "active" => Ok(VBState::Active),
            "replica" => Ok(VBState::Replica),
            "pending" => Ok(VBState::Pending),
            "dead" => Ok(VBState::Dead),
            _ => err_at!(InvalidInput, msg: "bad vbucket state {:?}", s),
        }
    }
}

/// One item held by a vbucket. The CAS token lives with the index entry,
/// not here, refer [crate::db::Entry].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Item {
    pub value: Vec<u8>,
    pub flags: u32,
    pub exp: u32,
}

impl Item {
    pub fn new(value: Vec<u8>, flags: u32, exp: u32) -> Item {
        Item { value, flags, exp }
    }

    fn is_expired(&self, now_secs: u32) -> bool {
        self.exp > 0 && self.exp <= now_secs
    }
}

impl Footprint for Item {
    fn footprint(&self) -> Result<isize> {
        let size = self.value.len() + ITEM_OVERHEAD;
        err_at!(FailConvert, isize::try_from(size))
    }
}

// live operation counters for one vbucket.
#[derive(Default)]
struct Counters {
    n_ops: AtomicU64,
    n_gets: AtomicU64,
    n_get_misses: AtomicU64,
    n_sets: AtomicU64,
    n_deletes: AtomicU64,
    n_incrs: AtomicU64,
    n_expired: AtomicU64,
    n_errs: AtomicU64,
}

/// Point-in-time statistics for one vbucket.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VBStats {
    /// Number of live items, equals the cardinality of the ordered map.
    pub items: usize,
    /// Sum over items of key-bytes + value-bytes + fixed header, plus
    /// the vbucket's state metadata bytes.
    pub item_bytes: usize,
    pub n_ops: u64,
    pub n_gets: u64,
    pub n_get_misses: u64,
    pub n_sets: u64,
    pub n_deletes: u64,
    pub n_incrs: u64,
    pub n_expired: u64,
    pub n_errs: u64,
}

/// A virtual-partition, one of N independent stores within a bucket.
pub struct VBucket {
    id: u16,
    state: Spinlock<VBState>,
    index: llrb::Index<Vec<u8>, Item>,
    counters: Counters,
    // bytes charged for state metadata, non-zero once the state has
    // been explicitly set. persists across flush/load.
    meta_bytes: AtomicUsize,
}

impl VBucket {
    pub fn new(id: u16) -> VBucket {
        VBucket {
            id,
            state: Spinlock::new(VBState::Pending),
            index: llrb::Index::new(&format!("vbucket-{}", id)),
            counters: Counters::default(),
            meta_bytes: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn to_id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn to_state(&self) -> VBState {
        *self.state.read()
    }

    /// Transition this vbucket to `next` state. Illegal transitions are
    /// rejected with [Error::InvalidInput].
    pub fn set_state(&self, next: VBState) -> Result<()> {
        {
            let mut state = self.state.write();
            if !state.is_legal_transition(next) {
                // the write-guard is still held, compose the error after
                // reading the current value.
                let cur = *state;
                return err_at!(InvalidInput, msg: "vbucket {} {} -> {}", self.id, cur, next);
            }
            *state = next;
        }

        // state metadata is charged to the byte count, a transition is
        // visible in stats even on an empty vbucket.
        self.meta_bytes.store(self.meta_record_len(next), SeqCst);

        debug!(target: "vbucket", "vbucket {} now {}", self.id, next);
        Ok(())
    }

    // restore state without legality checks, reload path only.
    pub(crate) fn load_state(&self, state: VBState, charge_meta: bool) {
        *self.state.write() = state;
        if charge_meta {
            self.meta_bytes.store(self.meta_record_len(state), SeqCst);
        }
    }

    fn meta_record_len(&self, state: VBState) -> usize {
        format!("{{\"id\":{},\"state\":\"{}\"}}", self.id, state).len()
    }

    pub(crate) fn as_index(&self) -> &llrb::Index<Vec<u8>, Item> {
        &self.index
    }

    /// Number of live items.
    pub fn items(&self) -> usize {
        self.index.len()
    }

    /// Byte footprint of live items plus state metadata.
    pub fn item_bytes(&self) -> usize {
        let tree = usize::try_from(self.index.footprint().unwrap_or(0)).unwrap_or(0);
        tree + self.meta_bytes.load(SeqCst)
    }

    pub(crate) fn to_meta_bytes(&self) -> usize {
        self.meta_bytes.load(SeqCst)
    }

    pub(crate) fn set_meta_bytes(&self, n: usize) {
        self.meta_bytes.store(n, SeqCst)
    }

    /// Highest mutation sequence-number.
    pub fn to_seqno(&self) -> u64 {
        self.index.to_seqno()
    }

    /// Take a point-in-time snapshot of this vbucket's statistics.
    pub fn to_stats(&self) -> VBStats {
        let c = &self.counters;
        VBStats {
            items: self.items(),
            item_bytes: self.item_bytes(),
            n_ops: c.n_ops.load(SeqCst),
            n_gets: c.n_gets.load(SeqCst),
            n_get_misses: c.n_get_misses.load(SeqCst),
            n_sets: c.n_sets.load(SeqCst),
            n_deletes: c.n_deletes.load(SeqCst),
            n_incrs: c.n_incrs.load(SeqCst),
            n_expired: c.n_expired.load(SeqCst),
            n_errs: c.n_errs.load(SeqCst),
        }
    }
}

impl VBucket {
    /// Iterate items in key order under a read snapshot, starting from
    /// optional `start` key. Mutations after the visitor was created are
    /// invisible to it. `callback` returning false aborts the walk.
    pub fn visit<F>(&self, start: Option<&[u8]>, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        match start {
            Some(start) => {
                for entry in self
                    .index
                    .range::<_, [u8]>((Bound::Included(start), Bound::Unbounded))
                {
                    if !callback(&entry.key, &entry.value.value) {
                        break;
                    }
                }
            }
            None => {
                for entry in self.index.iter() {
                    if !callback(&entry.key, &entry.value.value) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove items whose expiration has passed. Background chore,
    /// registered with the periodic multiplexer by the owning bucket.
    pub fn expire_items(&self, now: time::SystemTime) -> Result<usize> {
        let now_secs = unix_seconds(now);
        let expired: Vec<Vec<u8>> = self
            .index
            .iter()
            .filter(|e| e.value.is_expired(now_secs))
            .map(|e| e.key)
            .collect();

        let mut n = 0;
        for key in expired.iter() {
            // the item may have been rewritten since the scan, recheck
            // under the current snapshot before removing.
            match self.index.get(key.as_slice()) {
                Ok(e) if e.value.is_expired(now_secs) => {
                    self.index.remove_cas(key.as_slice(), e.seqno).ok();
                    n += 1;
                }
                _ => (),
            }
        }

        if n > 0 {
            self.counters.n_expired.fetch_add(n as u64, SeqCst);
            debug!(target: "vbucket", "vbucket {} expired {} items", self.id, n);
        }
        Ok(n)
    }

    /// Apply one decoded request against this vbucket. Quiet opcodes
    /// return None on success (and on miss, for GetQ).
    pub fn dispatch(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_ops.fetch_add(1, SeqCst);

        let resp = match req.opcode {
            Opcode::Get | Opcode::GetQ => self.do_get(req),
            Opcode::Set | Opcode::SetQ => self.do_set(req),
            Opcode::Add => self.do_add(req),
            Opcode::Replace => self.do_replace(req),
            Opcode::Delete | Opcode::DeleteQ => self.do_delete(req),
            Opcode::Incr => self.do_arith(req, true),
            Opcode::Decr => self.do_arith(req, false),
            Opcode::Noop => Some(McResponse::new(Status::Success)),
            _ => Some(McResponse::new(Status::UnknownCommand)),
        };

        if let Some(resp) = resp.as_ref() {
            if !resp.is_success() {
                self.counters.n_errs.fetch_add(1, SeqCst);
            }
        }
        resp
    }

    fn do_get(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_gets.fetch_add(1, SeqCst);

        let now_secs = unix_seconds(time::SystemTime::now());
        match self.index.get(req.key.as_slice()) {
            Ok(entry) if entry.value.is_expired(now_secs) => {
                // lazy expiry, the item is deleted on access and the
                // lookup counts as a miss.
                self.index.remove_cas(req.key.as_slice(), entry.seqno).ok();
                self.counters.n_expired.fetch_add(1, SeqCst);
                self.miss(req)
            }
            Ok(entry) => {
                let item = entry.value;
                Some(McResponse::with_item(entry.seqno, item.flags, item.value))
            }
            Err(_) => self.miss(req),
        }
    }

    fn miss(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_get_misses.fetch_add(1, SeqCst);
        match req.opcode {
            Opcode::GetQ => None,
            _ => Some(McResponse::new(Status::KeyNotFound)),
        }
    }

    fn do_set(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_sets.fetch_add(1, SeqCst);

        let exp = compute_exp(req.expiration, time::SystemTime::now);
        let item = Item::new(req.body.clone(), req.flags, exp);

        let res = match req.cas {
            0 => self.index.set(req.key.clone(), item),
            cas => self.index.set_cas(req.key.clone(), item, cas),
        };

        match res {
            Ok(wr) => match req.opcode {
                Opcode::SetQ => None,
                _ => Some(McResponse::new(Status::Success).set_cas(wr.seqno)),
            },
            Err(Error::InvalidCAS(_, _)) => Some(self.cas_failure(&req.key)),
            Err(_) => Some(McResponse::new(Status::Einval)),
        }
    }

    fn do_add(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_sets.fetch_add(1, SeqCst);

        let exp = compute_exp(req.expiration, time::SystemTime::now);
        let item = Item::new(req.body.clone(), req.flags, exp);

        // cas ZERO means create-only.
        match self.index.set_cas(req.key.clone(), item, 0) {
            Ok(wr) => Some(McResponse::new(Status::Success).set_cas(wr.seqno)),
            Err(Error::InvalidCAS(_, _)) => Some(McResponse::new(Status::KeyExists)),
            Err(_) => Some(McResponse::new(Status::Einval)),
        }
    }

    fn do_replace(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_sets.fetch_add(1, SeqCst);

        let exp = compute_exp(req.expiration, time::SystemTime::now);

        loop {
            let old = match self.index.get(req.key.as_slice()) {
                Ok(entry) => entry,
                Err(_) => break Some(McResponse::new(Status::KeyNotFound)),
            };
            let item = Item::new(req.body.clone(), req.flags, exp);
            match self.index.set_cas(req.key.clone(), item, old.seqno) {
                Ok(wr) => break Some(McResponse::new(Status::Success).set_cas(wr.seqno)),
                // lost the race with a concurrent writer, try again.
                Err(Error::InvalidCAS(_, _)) => continue,
                Err(_) => break Some(McResponse::new(Status::Einval)),
            }
        }
    }

    fn do_delete(&self, req: &McRequest) -> Option<McResponse> {
        self.counters.n_deletes.fetch_add(1, SeqCst);

        let res = match req.cas {
            0 => self.index.remove(req.key.as_slice()),
            cas => self.index.remove_cas(req.key.as_slice(), cas),
        };

        match res {
            Ok(wr) if wr.old_entry.is_some() => match req.opcode {
                Opcode::DeleteQ => None,
                _ => Some(McResponse::new(Status::Success)),
            },
            Ok(_) => Some(McResponse::new(Status::KeyNotFound)),
            Err(Error::InvalidCAS(_, _)) => Some(self.cas_failure(&req.key)),
            Err(_) => Some(McResponse::new(Status::Einval)),
        }
    }

    fn do_arith(&self, req: &McRequest, incr: bool) -> Option<McResponse> {
        self.counters.n_incrs.fetch_add(1, SeqCst);

        loop {
            match self.index.get(req.key.as_slice()) {
                Ok(entry) => {
                    let old = &entry.value;
                    let num: u64 = match str::from_utf8(&old.value)
                        .ok()
                        .and_then(|s| s.trim().parse().ok())
                    {
                        Some(num) => num,
                        None => break Some(McResponse::new(Status::DeltaBadval)),
                    };
                    let num = if incr {
                        num.wrapping_add(req.delta)
                    } else {
                        num.saturating_sub(req.delta)
                    };
                    let value = num.to_string().into_bytes();
                    let item = Item::new(value.clone(), old.flags, old.exp);
                    match self.index.set_cas(req.key.clone(), item, entry.seqno) {
                        Ok(wr) => {
                            let resp = McResponse::with_item(wr.seqno, 0, value);
                            break Some(resp);
                        }
                        Err(Error::InvalidCAS(_, _)) => continue,
                        Err(_) => break Some(McResponse::new(Status::Einval)),
                    }
                }
                Err(_) => match req.initial {
                    Some(initial) => {
                        let exp = compute_exp(req.expiration, time::SystemTime::now);
                        let value = initial.to_string().into_bytes();
                        let item = Item::new(value.clone(), 0, exp);
                        match self.index.set_cas(req.key.clone(), item, 0) {
                            Ok(wr) => {
                                let resp = McResponse::with_item(wr.seqno, 0, value);
                                break Some(resp);
                            }
                            Err(Error::InvalidCAS(_, _)) => continue,
                            Err(_) => break Some(McResponse::new(Status::Einval)),
                        }
                    }
                    None => break Some(McResponse::new(Status::KeyNotFound)),
                },
            }
        }
    }

    // a cas mismatch reports KeyExists when the key is present, else
    // KeyNotFound, matching the binary protocol.
    fn cas_failure(&self, key: &[u8]) -> McResponse {
        match self.index.get(key) {
            Ok(_) => McResponse::new(Status::KeyExists),
            Err(_) => McResponse::new(Status::KeyNotFound),
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
