use std::{convert::TryFrom, ffi, fmt, path, result};

use crate::{Error, Result};

/// Name of the settings file kept at the root of every bucket
/// directory, `settings.json`.
pub const SETTINGS_FILE: &str = "settings.json";

/// A vbucket file is uniquely locatable under a bucket's directory by
/// its partition-id. `format!("vbucket-{:04x}.vbs", vbid)`
#[derive(Clone)]
pub struct VBucketFileName(pub ffi::OsString);

impl From<u16> for VBucketFileName {
    fn from(vbid: u16) -> VBucketFileName {
        let file_name = format!("vbucket-{:04x}.vbs", vbid);
        VBucketFileName(AsRef::<ffi::OsStr>::as_ref(&file_name).to_os_string())
    }
}

impl TryFrom<VBucketFileName> for u16 {
    type Error = Error;

    fn try_from(fname: VBucketFileName) -> Result<u16> {
        let ffpp = path::Path::new(&fname.0);
        let vbid = || -> Option<u16> {
            let fname = ffpp.file_name()?.to_str()?;
            let stem = fname.strip_suffix(".vbs")?;
            let hex = stem.strip_prefix("vbucket-")?;
            u16::from_str_radix(hex, 16).ok()
        }();

        match vbid {
            Some(vbid) => Ok(vbid),
            None => err_at!(InvalidFile, msg: "{:?}", ffpp),
        }
    }
}

impl From<VBucketFileName> for ffi::OsString {
    fn from(name: VBucketFileName) -> ffi::OsString {
        name.0
    }
}

impl fmt::Display for VBucketFileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self.0.to_str() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Compose a path to the vbucket file identified by `vbid` under `dir`.
pub fn to_vbucket_location(dir: &ffi::OsStr, vbid: u16) -> ffi::OsString {
    let loc: path::PathBuf = [dir.to_os_string(), VBucketFileName::from(vbid).into()]
        .iter()
        .collect();
    loc.into_os_string()
}

/// Compose a path to the settings file under `dir`.
pub fn to_settings_location(dir: &ffi::OsStr) -> ffi::OsString {
    let loc: path::PathBuf = [dir, ffi::OsStr::new(SETTINGS_FILE)].iter().collect();
    loc.into_os_string()
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
