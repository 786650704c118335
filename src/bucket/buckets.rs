//! Process-wide registry of buckets under one data directory.

use fs2::FileExt;
use log::{info, warn};

use std::{
    collections::BTreeMap,
    ffi, fs, path,
    sync::{Arc, Mutex},
};

use crate::{bucket::Bucket, BucketSettings, Error, Result};

const LOCK_FILE: &str = ".registry.lock";

/// Registry of name -> [Bucket], initialized by scanning the data
/// directory. Publishes immutable bucket handles, bucket-level locking
/// is not its business.
///
/// The registry holds an exclusive file lock under the directory for its
/// lifetime, two processes cannot serve the same tree.
pub struct Buckets {
    dir: ffi::OsString,
    _lock_fd: fs::File,
    buckets: Mutex<BTreeMap<String, Arc<Bucket>>>,
}

impl Buckets {
    /// Create a registry over `dir`, scanning it for existing buckets.
    pub fn new(dir: &ffi::OsStr) -> Result<Buckets> {
        err_at!(IOError, fs::create_dir_all(dir))?;

        let lock_loc: path::PathBuf = [dir, ffi::OsStr::new(LOCK_FILE)].iter().collect();
        let lock_fd = err_at!(
            IOError,
            fs::OpenOptions::new().create(true).write(true).open(&lock_loc)
        )?;
        err_at!(IOError, lock_fd.try_lock_exclusive(), "registry {:?}", dir)?;

        let val = Buckets {
            dir: dir.to_os_string(),
            _lock_fd: lock_fd,
            buckets: Mutex::new(BTreeMap::new()),
        };
        val.load(false)?;
        Ok(val)
    }

    /// Create a new bucket named `name` under the registry directory.
    pub fn new_bucket(&self, name: &str, settings: BucketSettings) -> Result<Arc<Bucket>> {
        validate_bucket_name(name)?;

        let mut buckets = err_at!(Fatal, self.buckets.lock())?;
        if buckets.contains_key(name) {
            return err_at!(InvalidInput, msg: "bucket {:?} exists", name);
        }

        let dir = self.to_bucket_dir(name);
        let bucket = Arc::new(Bucket::create(&dir, name, settings)?);
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Return a handle to bucket `name`, if registered.
    pub fn get(&self, name: &str) -> Option<Arc<Bucket>> {
        let buckets = self.buckets.lock().ok()?;
        buckets.get(name).map(Arc::clone)
    }

    /// Return the names of registered buckets.
    pub fn get_names(&self) -> Vec<String> {
        match self.buckets.lock() {
            Ok(buckets) => buckets.keys().cloned().collect(),
            Err(_) => vec![],
        }
    }

    /// Close bucket `name` and drop it from the registry. Outstanding
    /// handles keep the bucket readable until they drop, the directory
    /// is deleted right away when `remove_data` asks for it.
    pub fn close(&self, name: &str, remove_data: bool) -> Result<()> {
        let bucket = {
            let mut buckets = err_at!(Fatal, self.buckets.lock())?;
            buckets.remove(name)
        };

        match bucket {
            Some(bucket) => {
                bucket.close()?;
                if remove_data {
                    err_at!(IOError, fs::remove_dir_all(self.to_bucket_dir(name)))?;
                }
                Ok(())
            }
            None => err_at!(KeyNotFound, msg: "no bucket {:?}", name),
        }
    }

    /// Reconcile the in-memory set with the directory. Buckets that
    /// appeared on disk are opened and loaded. With `rescan` true,
    /// buckets that disappeared from disk are closed out as well.
    pub fn load(&self, rescan: bool) -> Result<()> {
        let mut on_disk = vec![];
        for item in err_at!(IOError, fs::read_dir(&self.dir))? {
            let item = err_at!(IOError, item)?;
            let is_dir = item.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            match item.file_name().to_str() {
                Some(name) => on_disk.push(name.to_string()),
                None => warn!(target: "buckets", "skipping {:?}", item.file_name()),
            }
        }

        let mut buckets = err_at!(Fatal, self.buckets.lock())?;

        for name in on_disk.iter() {
            if buckets.contains_key(name) {
                continue;
            }
            let dir = self.to_bucket_dir(name);
            match Bucket::open(&dir, name).and_then(|b| b.load().map(|_| b)) {
                Ok(bucket) => {
                    info!(target: "buckets", "loaded bucket {:?}", name);
                    buckets.insert(name.clone(), Arc::new(bucket));
                }
                Err(err) => {
                    warn!(target: "buckets", "skipping bucket {:?}: {}", name, err)
                }
            }
        }

        if rescan {
            let gone: Vec<String> = buckets
                .keys()
                .filter(|name| !on_disk.contains(name))
                .cloned()
                .collect();
            for name in gone {
                if let Some(bucket) = buckets.remove(&name) {
                    info!(target: "buckets", "bucket {:?} disappeared, closing", name);
                    bucket.stop_maintenance().ok();
                    std::mem::drop(bucket);
                }
            }
        }

        Ok(())
    }

    fn to_bucket_dir(&self, name: &str) -> ffi::OsString {
        let dir: path::PathBuf = [self.dir.as_os_str(), ffi::OsStr::new(name)]
            .iter()
            .collect();
        dir.into_os_string()
    }
}

fn validate_bucket_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if ok {
        Ok(())
    } else {
        err_at!(InvalidInput, msg: "bad bucket name {:?}", name)
    }
}

#[cfg(test)]
#[path = "buckets_test.rs"]
mod buckets_test;
