//! Module `bucket` implement a named collection of virtual-partitions.
//!
//! A bucket owns N data vbuckets, a reserved design-doc vbucket, its
//! settings and its persistence directory. Partition count is fixed at
//! creation. Buckets are cheap to share, the registry and every live
//! request hold `Arc` handles, the last handle dropping closes the
//! directory for good.
//!
//! Persisted layout, one directory per bucket:
//!
//! ```text
//! <dir>/settings.json       settings, uuid included
//! <dir>/vbucket-<id>.vbs    one file per vbucket, cbor encoded
//! ```
//!
//! The design-doc vbucket persists under the reserved id `0xffff`.

use cbordata::Cborize;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::{
    collections::BTreeMap,
    convert::TryFrom,
    ffi, fs,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering::SeqCst},
        Arc, Mutex, Weak,
    },
    time,
};

use crate::{
    bucket::files::{to_settings_location, to_vbucket_location, VBucketFileName},
    periodic::{Periodic, StopSignal},
    util::{self, Spinlock},
    vbucket::{Item, VBState, VBStats, VBucket, MAX_VBUCKETS},
    view::ddoc::{check_ddoc, DesignDoc, DDOC_PREFIX},
    Error, Result,
};

mod buckets;
mod files;

pub use buckets::Buckets;

/// Reserved partition-id for the design-doc vbucket, outside the normal
/// partition range.
pub const DDOC_VBID: u16 = 0xffff;

const VBFILE_VER: u32 = 0x00010001;

/// Configuration for a [Bucket], fixed at creation and persisted along
/// with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketSettings {
    /// Number of virtual-partitions, a power of two upto [MAX_VBUCKETS].
    pub num_partitions: u16,
    /// Soft limit on the bucket's item bytes, ZERO disables the check.
    pub quota_bytes: u64,
    /// 0 persist everything, 1 persist settings only, 2 persist nothing.
    pub memory_only: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Assigned once at creation, preserved across reload.
    #[serde(default)]
    pub uuid: String,
}

impl Default for BucketSettings {
    fn default() -> BucketSettings {
        BucketSettings {
            num_partitions: MAX_VBUCKETS,
            quota_bytes: 0,
            memory_only: 0,
            password_hash: None,
            uuid: String::default(),
        }
    }
}

impl<'a> arbitrary::Arbitrary<'a> for BucketSettings {
    fn arbitrary(u: &mut arbitrary::Unstructured<'a>) -> arbitrary::Result<Self> {
        let num_partitions = *u.choose(&[1_u16, 2, 16, 64, 256, MAX_VBUCKETS])?;
        let quota_bytes = *u.choose(&[0_u64, 1_000_000, 100_000_000])?;
        let memory_only = *u.choose(&[0_u8, 0, 0, 1, 2])?;

        let val = BucketSettings {
            num_partitions,
            quota_bytes,
            memory_only,
            password_hash: None,
            uuid: String::default(),
        };
        Ok(val)
    }
}

impl BucketSettings {
    pub fn set_num_partitions(&mut self, num_partitions: u16) -> &mut Self {
        self.num_partitions = num_partitions;
        self
    }

    pub fn set_quota_bytes(&mut self, quota_bytes: u64) -> &mut Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn set_memory_only(&mut self, memory_only: u8) -> &mut Self {
        self.memory_only = memory_only;
        self
    }

    fn validate(&self) -> Result<()> {
        let np = self.num_partitions;
        if np == 0 || np > MAX_VBUCKETS || !np.is_power_of_two() {
            err_at!(InvalidInput, msg: "bad num_partitions {}", np)
        } else {
            Ok(())
        }
    }
}

// cbor record, one per vbucket file.
#[derive(Clone, Cborize)]
struct VBucketFile {
    id: u16,
    state: String,
    seqno: u64,
    meta_bytes: u64,
    items: Vec<FileItem>,
}

impl VBucketFile {
    const ID: u32 = VBFILE_VER;
}

#[derive(Clone, Cborize)]
struct FileItem {
    key: Vec<u8>,
    value: Vec<u8>,
    flags: u32,
    exp: u32,
    cas: u64,
}

impl FileItem {
    const ID: u32 = VBFILE_VER;
}

/// Aggregate statistics over all of a bucket's vbuckets.
#[derive(Clone, Debug, Default)]
pub struct BucketStats {
    pub items: usize,
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

impl BucketStats {
    fn merge(&mut self, s: &VBStats) {
        self.items += s.items;
        self.item_bytes += s.item_bytes;
        self.n_ops += s.n_ops;
        self.n_gets += s.n_gets;
        self.n_get_misses += s.n_get_misses;
        self.n_sets += s.n_sets;
        self.n_deletes += s.n_deletes;
        self.n_incrs += s.n_incrs;
        self.n_expired += s.n_expired;
        self.n_errs += s.n_errs;
    }
}

// background chores for one bucket, stats aggregation, expiry sweep
// and the flush trigger.
struct Maint {
    periodic: Periodic,
    stats_stop: StopSignal,
    expiry_stop: StopSignal,
    flush_stop: StopSignal,
}

/// A named collection of N vbuckets plus a design-doc vbucket.
pub struct Bucket {
    name: String,
    dir: ffi::OsString,
    settings: BucketSettings,
    settings_bytes: AtomicUsize,

    // slot table keyed by partition-id.
    slots: Vec<Spinlock<Option<Arc<VBucket>>>>,
    ddocs_vb: Arc<VBucket>,

    ddoc_version: AtomicU64,
    #[allow(clippy::type_complexity)]
    ddoc_cache: Spinlock<(u64, Option<Arc<BTreeMap<String, DesignDoc>>>)>,

    stats_snap: Spinlock<Arc<BucketStats>>,
    maint: Mutex<Option<Maint>>,
}

impl Bucket {
    /// Create a fresh bucket under `dir`. Assigns the uuid and persists
    /// the settings, memory-only level permitting.
    pub fn create(dir: &ffi::OsStr, name: &str, settings: BucketSettings) -> Result<Bucket> {
        settings.validate()?;

        let mut settings = settings;
        if settings.uuid.is_empty() {
            settings.uuid = Uuid::new_v4().simple().to_string();
        }

        let data = err_at!(FailJson, serde_json::to_vec_pretty(&settings))?;
        if settings.memory_only < 2 {
            err_at!(IOError, fs::create_dir_all(dir))?;
            util::save_file(&to_settings_location(dir), &data)?;
        }

        info!(target: "bucket", "created bucket {:?} uuid {}", name, settings.uuid);

        Ok(Bucket::from_parts(dir, name, settings, data.len()))
    }

    /// Open a bucket previously created under `dir`. Item data is not
    /// read back until [Bucket::load] is called.
    pub fn open(dir: &ffi::OsStr, name: &str) -> Result<Bucket> {
        let data = util::load_file(&to_settings_location(dir))?;
        let settings: BucketSettings = err_at!(FailJson, serde_json::from_slice(&data))?;
        settings.validate()?;

        Ok(Bucket::from_parts(dir, name, settings, data.len()))
    }

    fn from_parts(
        dir: &ffi::OsStr,
        name: &str,
        settings: BucketSettings,
        settings_bytes: usize,
    ) -> Bucket {
        let slots = (0..settings.num_partitions)
            .map(|_| Spinlock::new(None))
            .collect();

        Bucket {
            name: name.to_string(),
            dir: dir.to_os_string(),
            settings,
            settings_bytes: AtomicUsize::new(settings_bytes),

            slots,
            ddocs_vb: Arc::new(VBucket::new(DDOC_VBID)),

            ddoc_version: AtomicU64::new(0),
            ddoc_cache: Spinlock::new((0, None)),

            stats_snap: Spinlock::new(Arc::new(BucketStats::default())),
            maint: Mutex::new(None),
        }
    }

    /// Return name of this bucket.
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    /// Return a clone of this bucket's settings.
    pub fn get_bucket_settings(&self) -> BucketSettings {
        self.settings.clone()
    }

    /// Create vbucket for partition `vbid` in Pending state. Fails if the
    /// id is out of range or the vbucket already exists.
    pub fn create_vbucket(&self, vbid: u16) -> Result<Arc<VBucket>> {
        let slot = self.to_slot(vbid)?;
        let mut slot = slot.write();
        match slot.as_ref() {
            Some(_) => err_at!(InvalidInput, msg: "vbucket {} exists", vbid),
            None => {
                let vb = Arc::new(VBucket::new(vbid));
                *slot = Some(Arc::clone(&vb));
                Ok(vb)
            }
        }
    }

    /// Return vbucket for partition `vbid`, if present.
    pub fn get_vbucket(&self, vbid: u16) -> Option<Arc<VBucket>> {
        let slot = self.to_slot(vbid).ok()?;
        let slot = slot.read();
        slot.as_ref().map(Arc::clone)
    }

    /// Transition vbucket `vbid` to `state`, creating it on the fly when
    /// missing. State changes are accepted regardless of current state
    /// legality of data traffic.
    pub fn set_vb_state(&self, vbid: u16, state: VBState) -> Result<()> {
        let vb = match self.get_vbucket(vbid) {
            Some(vb) => vb,
            None => self.create_vbucket(vbid)?,
        };
        vb.set_state(state)
    }

    /// Drop vbucket `vbid` from the slot table. Its file, if any, stays
    /// until the next [Bucket::compact].
    pub fn destroy_vbucket(&self, vbid: u16) -> Option<Arc<VBucket>> {
        let slot = self.to_slot(vbid).ok()?;
        slot.write().take()
    }

    fn to_slot(&self, vbid: u16) -> Result<&Spinlock<Option<Arc<VBucket>>>> {
        match self.slots.get(usize::from(vbid)) {
            Some(slot) => Ok(slot),
            None => err_at!(InvalidInput, msg: "vbucket {} out of range", vbid),
        }
    }

    /// Iterate existing vbuckets, in partition order.
    pub fn vbuckets(&self) -> Vec<Arc<VBucket>> {
        let mut vbs = vec![];
        for slot in self.slots.iter() {
            if let Some(vb) = slot.read().as_ref() {
                vbs.push(Arc::clone(vb));
            }
        }
        vbs
    }
}

impl Bucket {
    /// Validate and store a design document. `key` is the full document
    /// id, `_design/<name>`. Bumps the parsed-cache version.
    pub fn set_ddoc(&self, key: &str, body: &[u8]) -> Result<()> {
        if !key.starts_with(DDOC_PREFIX) {
            return err_at!(InvalidInput, msg: "bad design-doc key {:?}", key);
        }
        check_ddoc(body)?;

        let item = Item::new(body.to_vec(), 0, 0);
        self.ddocs_vb
            .as_index()
            .set(key.as_bytes().to_vec(), item)?;
        self.ddoc_version.fetch_add(1, SeqCst);

        debug!(target: "bucket", "{} stored design-doc {}", self.name, key);
        Ok(())
    }

    /// Return the raw body of design document `key`, None when absent.
    pub fn get_ddoc(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.ddocs_vb.as_index().get(key.as_bytes()) {
            Ok(entry) => Ok(Some(entry.value.value)),
            Err(Error::KeyNotFound(_, _)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Return the parsed design documents, a cached copy. The cache is
    /// invalidated by [Bucket::set_ddoc] and revalidated here against the
    /// version counter.
    pub fn get_ddocs(&self) -> Result<Arc<BTreeMap<String, DesignDoc>>> {
        let version = self.ddoc_version.load(SeqCst);
        {
            let cache = self.ddoc_cache.read();
            if let (v, Some(ddocs)) = &*cache {
                if *v == version {
                    return Ok(Arc::clone(ddocs));
                }
            }
        }

        let mut ddocs = BTreeMap::new();
        for entry in self.ddocs_vb.as_index().iter() {
            let key = match std::str::from_utf8(&entry.key) {
                Ok(key) if key.starts_with(DDOC_PREFIX) => key.to_string(),
                _ => continue,
            };
            match serde_json::from_slice::<DesignDoc>(&entry.value.value) {
                Ok(ddoc) => {
                    ddocs.insert(key, ddoc);
                }
                Err(err) => {
                    warn!(target: "bucket", "{} skipping design-doc {}: {}", self.name, key, err)
                }
            }
        }

        let ddocs = Arc::new(ddocs);
        *self.ddoc_cache.write() = (version, Some(Arc::clone(&ddocs)));
        Ok(ddocs)
    }
}

impl Bucket {
    /// Total byte footprint: settings, vbucket state metadata, live
    /// items, design docs.
    pub fn get_item_bytes(&self) -> usize {
        let mut n = self.settings_bytes.load(SeqCst);
        n += self.ddocs_vb.item_bytes();
        for vb in self.vbuckets() {
            n += vb.item_bytes();
        }
        n
    }

    /// Aggregate vbucket statistics into a fresh snapshot, publish it
    /// RCU-style and return it.
    pub fn snapshot_stats(&self) -> Arc<BucketStats> {
        let mut stats = BucketStats {
            item_bytes: self.settings_bytes.load(SeqCst) + self.ddocs_vb.item_bytes(),
            ..BucketStats::default()
        };
        for vb in self.vbuckets() {
            stats.merge(&vb.to_stats());
        }

        let stats = Arc::new(stats);
        *self.stats_snap.write() = Arc::clone(&stats);
        stats
    }

    /// Return the last published stats snapshot without recomputing.
    pub fn cached_stats(&self) -> Arc<BucketStats> {
        Arc::clone(&self.stats_snap.read())
    }

    /// Start background maintenance on this bucket's own periodic
    /// multiplexer ticking every `interval`: stats aggregation, the
    /// expiry sweep and, persistence level permitting, a flush whenever
    /// mutations happened since the last one. No-op when already
    /// started.
    pub fn start_stats(self: &Arc<Self>, interval: time::Duration) -> Result<()> {
        let mut maint = err_at!(Fatal, self.maint.lock())?;
        if maint.is_some() {
            return Ok(());
        }

        let name = format!("{}-maint", self.name);
        let periodic = Periodic::new(&name, interval, 2)?;

        let stats_stop = StopSignal::new();
        {
            let weak: Weak<Bucket> = Arc::downgrade(self);
            periodic.register(
                &stats_stop,
                Box::new(move |_t| match weak.upgrade() {
                    Some(bucket) => {
                        bucket.snapshot_stats();
                        true
                    }
                    None => false,
                }),
            )?;
        }

        let expiry_stop = StopSignal::new();
        {
            let weak: Weak<Bucket> = Arc::downgrade(self);
            periodic.register(
                &expiry_stop,
                Box::new(move |t| match weak.upgrade() {
                    Some(bucket) => {
                        for vb in bucket.vbuckets() {
                            vb.expire_items(t).ok();
                        }
                        true
                    }
                    None => false,
                }),
            )?;
        }

        let flush_stop = StopSignal::new();
        if self.settings.memory_only < 2 {
            let weak: Weak<Bucket> = Arc::downgrade(self);
            // anything before the first tick counts as a change.
            let mut last_marker = u64::MAX;
            periodic.register(
                &flush_stop,
                Box::new(move |_t| match weak.upgrade() {
                    Some(bucket) => {
                        let marker = bucket.mutation_marker();
                        if marker != last_marker {
                            if let Err(err) = bucket.flush() {
                                warn!(target: "bucket", "{} background flush: {}",
                                      bucket.name, err);
                            }
                            last_marker = marker;
                        }
                        true
                    }
                    None => false,
                }),
            )?;
        }

        *maint = Some(Maint {
            periodic,
            stats_stop,
            expiry_stop,
            flush_stop,
        });
        Ok(())
    }

    // cheap change detector for the background flush, mutations bump
    // vbucket seqnos, design-doc stores bump the version counter.
    fn mutation_marker(&self) -> u64 {
        let mut marker = self.ddocs_vb.to_seqno() + self.ddoc_version.load(SeqCst);
        for vb in self.vbuckets() {
            marker = marker.wrapping_add(vb.to_seqno()).wrapping_add(1);
        }
        marker
    }

    fn stop_maintenance(&self) -> Result<()> {
        let maint = err_at!(Fatal, self.maint.lock())?.take();
        if let Some(maint) = maint {
            maint.stats_stop.close();
            maint.expiry_stop.close();
            maint.flush_stop.close();
            maint.periodic.close()?;
        }
        Ok(())
    }
}

impl Bucket {
    /// Persist settings and every vbucket to the bucket directory. After
    /// flush returns, a fresh [Bucket::open] + [Bucket::load] off the same
    /// directory reproduces items, byte counts and visitor output.
    pub fn flush(&self) -> Result<()> {
        if self.settings.memory_only >= 2 {
            return Ok(());
        }

        let data = err_at!(FailJson, serde_json::to_vec_pretty(&self.settings))?;
        util::save_file(&to_settings_location(&self.dir), &data)?;

        if self.settings.memory_only == 1 {
            return Ok(());
        }

        // file writes ride a flusher thread, the snapshot walk and the
        // disk syncs overlap.
        let th: util::Thread<(ffi::OsString, Vec<u8>), (), Result<()>> =
            util::Thread::new_sync("flusher", 16, |rx: util::thread::Rx<(ffi::OsString, Vec<u8>), ()>| {
                move || {
                    for (msg, _) in rx {
                        let (loc, data) = msg;
                        util::save_file(&loc, &data)?;
                    }
                    Ok(())
                }
            });
        let tx = th.to_tx();

        let mut vbs = self.vbuckets();
        vbs.push(Arc::clone(&self.ddocs_vb));
        for vb in vbs {
            let record = to_vbucket_file(&vb)?;
            let data = util::into_cbor_bytes(record)?;
            let loc = to_vbucket_location(&self.dir, vb.to_id());
            tx.post((loc, data))?;
        }

        std::mem::drop(tx);
        th.join()??;

        debug!(target: "bucket", "{} flushed to {:?}", self.name, self.dir);
        Ok(())
    }

    /// Read vbucket files back from the bucket directory. Files for
    /// partitions outside the configured range are ignored with a warning.
    pub fn load(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) if self.settings.memory_only >= 2 => return Ok(()),
            Err(err) => return err_at!(IOError, Err(err)),
        };

        for item in entries {
            let file_name = err_at!(IOError, item)?.file_name();
            let vbid = match u16::try_from(VBucketFileName(file_name.clone())) {
                Ok(vbid) => vbid,
                Err(_) => continue, // settings.json and strays
            };

            let loc = to_vbucket_location(&self.dir, vbid);
            let data = util::load_file(&loc)?;
            let (record, _) = util::from_cbor_bytes::<VBucketFile>(&data)?;

            if record.id == DDOC_VBID {
                load_vbucket_file(&self.ddocs_vb, record)?;
                self.ddoc_version.fetch_add(1, SeqCst);
            } else if record.id < self.settings.num_partitions {
                let vb = match self.get_vbucket(record.id) {
                    Some(vb) => vb,
                    None => self.create_vbucket(record.id)?,
                };
                load_vbucket_file(&vb, record)?;
            } else {
                warn!(target: "bucket", "{} stray vbucket file {:?}", self.name, file_name);
            }
        }
        Ok(())
    }

    /// Drop Dead vbuckets, unlink their files and files for partitions
    /// that no longer exist, then re-flush the live set.
    pub fn compact(&self) -> Result<()> {
        for vb in self.vbuckets() {
            if vb.to_state() == VBState::Dead {
                self.destroy_vbucket(vb.to_id());
            }
        }

        if self.settings.memory_only >= 1 {
            return Ok(());
        }

        for item in err_at!(IOError, fs::read_dir(&self.dir))? {
            let file_name = err_at!(IOError, item)?.file_name();
            let vbid = match u16::try_from(VBucketFileName(file_name)) {
                Ok(vbid) => vbid,
                Err(_) => continue,
            };
            let live = vbid == DDOC_VBID || self.get_vbucket(vbid).is_some();
            if !live {
                let loc = to_vbucket_location(&self.dir, vbid);
                err_at!(IOError, fs::remove_file(&loc))?;
                debug!(target: "bucket", "{} compacted away vbucket {}", self.name, vbid);
            }
        }

        self.flush()
    }

    /// Stop maintenance and persist a final snapshot. The in-memory
    /// handle stays usable for reads until the last `Arc` drops.
    pub fn close(&self) -> Result<()> {
        self.stop_maintenance()?;
        self.flush()?;
        info!(target: "bucket", "closed bucket {:?}", self.name);
        Ok(())
    }
}

fn to_vbucket_file(vb: &VBucket) -> Result<VBucketFile> {
    let mut items = vec![];
    for entry in vb.as_index().iter() {
        items.push(FileItem {
            key: entry.key,
            value: entry.value.value,
            flags: entry.value.flags,
            exp: entry.value.exp,
            cas: entry.seqno,
        });
    }

    Ok(VBucketFile {
        id: vb.to_id(),
        state: vb.to_state().to_string(),
        seqno: vb.to_seqno(),
        meta_bytes: vb.to_meta_bytes() as u64,
        items,
    })
}

fn load_vbucket_file(vb: &VBucket, record: VBucketFile) -> Result<()> {
    let state = VBState::from_str(&record.state)?;
    vb.load_state(state, false);
    vb.set_meta_bytes(usize::try_from(record.meta_bytes).unwrap_or(0));

    for item in record.items {
        let value = Item::new(item.value, item.flags, item.exp);
        vb.as_index().load_entry(item.key, value, item.cas)?;
    }
    vb.as_index().set_seqno(record.seqno);

    Ok(())
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
