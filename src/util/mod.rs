//! Module implement common utility functions and types.

use cbordata::{Cbor, FromCbor, IntoCbor};

use std::{ffi, fs, path};

use crate::{Error, Result};

pub mod spinlock;
pub mod thread;

pub use spinlock::Spinlock;
pub use thread::Thread;

/// Helper function to serialize value `T` implementing IntoCbor, into byte-string.
pub fn into_cbor_bytes<T>(val: T) -> Result<Vec<u8>>
where
    T: IntoCbor,
{
    let mut data: Vec<u8> = vec![];
    let n = err_at!(
        FailCbor,
        err_at!(FailCbor, val.into_cbor())?.encode(&mut data)
    )?;
    if n != data.len() {
        err_at!(Fatal, msg: "cbor encoding len mistmatch {} {}", n, data.len())
    } else {
        Ok(data)
    }
}

/// Helper function to deserialize value `T` implementing FromCbor, from byte-string.
/// Return (value, bytes-consumed)
pub fn from_cbor_bytes<T>(mut data: &[u8]) -> Result<(T, usize)>
where
    T: FromCbor,
{
    let (val, n) = err_at!(FailCbor, Cbor::decode(&mut data))?;
    Ok((err_at!(FailCbor, T::from_cbor(val))?, n))
}

// create file under its parent directory, purging any existing file.
pub fn create_file_w(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = {
        let os_file = path::Path::new(file);
        fs::remove_file(os_file).ok(); // NOTE: ignore remove errors.
        os_file
    };

    {
        let parent = match os_file.parent() {
            Some(parent) => Ok(parent),
            None => err_at!(InvalidFile, msg: "{:?}", file),
        }?;
        err_at!(IOError, fs::create_dir_all(parent))?;
    };

    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.write(true).create_new(true).open(os_file)
    )?)
}

/// Write the whole of `data` into file located at `loc`, sync data to disk
/// before returning. Shall overwrite an existing file.
pub fn save_file(loc: &ffi::OsStr, data: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut fd = create_file_w(loc)?;
    let n = err_at!(IOError, fd.write(data))?;
    if n != data.len() {
        err_at!(IOError, msg: "partial write {:?} {}/{}", loc, n, data.len())?
    }
    err_at!(IOError, fd.sync_all())
}

/// Read back the whole of file located at `loc`.
pub fn load_file(loc: &ffi::OsStr) -> Result<Vec<u8>> {
    err_at!(IOError, fs::read(loc))
}
