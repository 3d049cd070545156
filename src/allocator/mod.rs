//! Address allocation.
//!
//! Every router hands out structured SIDs from the nibble below its own
//! SID; the leader additionally owns the mobile SID pool and the RSID
//! space used by super routers.

mod rsid;
mod sid;

pub use rsid::RsidAllocator;
pub use sid::{SidAllocator, SidLease, LEADER_CHILD_SLOTS, MOBILE_SID_SLOTS, ROUTER_CHILD_SLOTS};

use crate::identity::Sid;
use crate::protocol::AllocStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No base SID yet, or the allocator is not ours to run.
    #[error("allocator busy")]
    Busy,

    #[error("address space exhausted")]
    Exhausted,

    #[error("{0} is not allocated")]
    NotAllocated(Sid),
}

impl AllocError {
    /// Status carried in attach and SID responses.
    pub fn status(&self) -> AllocStatus {
        match self {
            AllocError::Busy => AllocStatus::Busy,
            AllocError::Exhausted | AllocError::NotAllocated(_) => AllocStatus::Exhausted,
        }
    }
}
