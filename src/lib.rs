//! Package implement a partitioned, embeddable key/value store.
//!
//! Keys are routed to one of N virtual-partitions, aka [VBucket], by
//! hashing the key, refer [vbucket_id_for_key]. Each vbucket is an
//! independent ordered store with its own state machine and statistics.
//! A collection of vbuckets make a [Bucket], a collection of buckets,
//! under a single data directory, make the process-wide [Buckets]
//! registry.
//!
//! Requests enter the system as pre-decoded memcached-style records,
//! refer [mc] module, and are routed by the [Handler] type. On top of
//! the same storage, the [view] module evaluates couch-style map/reduce
//! design documents by streaming each vbucket's snapshot through an
//! embedded scripting sandbox, collating the emitted rows and applying
//! range/reduce/paginate stages.
//!
//! Background work, stats aggregation and expiry sweeping, is driven by
//! the [Periodic] multiplexer, a time-source fan-out over a bounded set
//! of workers.

use std::result;

/// Short form to compose Error values.
///
/// Macro formats:
///
/// ```ignore
/// err_at!(Variant, msg: "format", args..)
/// err_at!(Variant, result-expression)
/// err_at!(Variant, result-expression, "format", args..)
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

mod bucket;
mod db;
mod dispatch;
mod error;
pub mod llrb;
pub mod mc;
mod periodic;
pub mod util;
mod vbucket;
pub mod view;

pub mod couch;

pub use bucket::{Bucket, BucketSettings, BucketStats, Buckets};
pub use error::Error;
pub use dispatch::Handler;
pub use periodic::{Periodic, StopSignal};
pub use vbucket::{
    compute_exp, vbucket_id_for_key, Item, VBState, VBStats, VBucket, MAX_VBUCKETS,
};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;
