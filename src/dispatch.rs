//! Module `dispatch` route decoded requests to virtual-partitions.
//!
//! Routing is mechanical: resolve the vbucket from the request's
//! partition-id, enforce the state machine, hand off to
//! [VBucket::dispatch]. Data opcodes against anything but an Active
//! vbucket answer NotMyVBucket, state-administering opcodes are always
//! accepted.

use std::{str, sync::Arc};

use crate::{
    bucket::Bucket,
    mc::{McRequest, McResponse, Opcode, Status},
    vbucket::{VBState, VBucket},
};

/// Per-connection request handler, bound to the connection's current
/// bucket.
pub struct Handler {
    bucket: Arc<Bucket>,
}

impl Handler {
    pub fn new(bucket: Arc<Bucket>) -> Handler {
        Handler { bucket }
    }

    /// Return the bucket this handler dispatches into.
    pub fn to_bucket(&self) -> Arc<Bucket> {
        Arc::clone(&self.bucket)
    }

    /// Route one decoded request. Quiet opcodes may return None, refer
    /// [VBucket::dispatch].
    pub fn dispatch(&self, req: &McRequest) -> Option<McResponse> {
        match req.opcode {
            Opcode::Noop => Some(McResponse::new(Status::Success)),
            Opcode::SetVBState => Some(self.set_vb_state(req)),
            Opcode::GetVBState => Some(self.get_vb_state(req)),
            Opcode::DelVBucket => Some(self.del_vbucket(req)),
            opcode if opcode.is_data() => self.dispatch_data(req),
            _ => Some(McResponse::new(Status::UnknownCommand)),
        }
    }

    fn dispatch_data(&self, req: &McRequest) -> Option<McResponse> {
        let vb = match self.resolve_active(req.vbucket) {
            Some(vb) => vb,
            None => return Some(McResponse::new(Status::NotMyVBucket)),
        };

        if self.over_quota(req) {
            return Some(McResponse::new(Status::Enomem));
        }

        vb.dispatch(req)
    }

    fn resolve_active(&self, vbid: u16) -> Option<Arc<VBucket>> {
        let vb = self.bucket.get_vbucket(vbid)?;
        match vb.to_state() {
            VBState::Active => Some(vb),
            _ => None,
        }
    }

    // soft quota, checked on the mutating opcodes only.
    fn over_quota(&self, req: &McRequest) -> bool {
        let quota = self.bucket.get_bucket_settings().quota_bytes;
        if quota == 0 {
            return false;
        }
        match req.opcode {
            Opcode::Set | Opcode::SetQ | Opcode::Add | Opcode::Replace => {
                let incoming = (req.key.len() + req.body.len()) as u64;
                self.bucket.get_item_bytes() as u64 + incoming > quota
            }
            _ => false,
        }
    }

    fn set_vb_state(&self, req: &McRequest) -> McResponse {
        let state: VBState = match str::from_utf8(&req.body).ok().and_then(|s| s.parse().ok())
        {
            Some(state) => state,
            None => return McResponse::new(Status::Einval),
        };
        match self.bucket.set_vb_state(req.vbucket, state) {
            Ok(_) => McResponse::new(Status::Success),
            Err(_) => McResponse::new(Status::Einval),
        }
    }

    fn get_vb_state(&self, req: &McRequest) -> McResponse {
        match self.bucket.get_vbucket(req.vbucket) {
            Some(vb) => {
                let body = vb.to_state().to_string().into_bytes();
                McResponse::new(Status::Success).set_body(body)
            }
            None => McResponse::new(Status::NotMyVBucket),
        }
    }

    fn del_vbucket(&self, req: &McRequest) -> McResponse {
        match self.bucket.destroy_vbucket(req.vbucket) {
            Some(_) => McResponse::new(Status::Success),
            None => McResponse::new(Status::NotMyVBucket),
        }
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod dispatch_test;
