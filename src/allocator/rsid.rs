use super::AllocError;
use crate::identity::{ExtAddr, Rsid};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RsidLease {
    ext: ExtAddr,
    expires_ms: u64,
}

/// Leader-side allocator of router SIDs for super routers.
#[derive(Debug)]
pub struct RsidAllocator {
    max_rsid: u8,
    lease_ms: u64,
    enabled: bool,
    leases: BTreeMap<Rsid, RsidLease>,
}

impl RsidAllocator {
    pub fn new(max_rsid: u8, lease_ms: u64) -> Self {
        Self {
            max_rsid,
            lease_ms,
            enabled: false,
            leases: BTreeMap::new(),
        }
    }

    /// Only a leader runs the allocator; anything else answers `Busy`.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.leases.clear();
        }
    }

    pub fn allocate(
        &mut self,
        ext: ExtAddr,
        requested: Option<Rsid>,
        now_ms: u64,
    ) -> Result<Rsid, AllocError> {
        if !self.enabled {
            return Err(AllocError::Busy);
        }
        let expires_ms = now_ms + self.lease_ms;
        if let Some((rsid, lease)) = self.leases.iter_mut().find(|(_, l)| l.ext == ext) {
            lease.expires_ms = expires_ms;
            return Ok(*rsid);
        }
        let in_range = |r: &Rsid| r.as_u8() >= 1 && r.as_u8() <= self.max_rsid;
        let rsid = requested
            .filter(|r| in_range(r) && !self.leases.contains_key(r))
            .or_else(|| {
                (1..=self.max_rsid)
                    .map(Rsid::new)
                    .find(|r| !self.leases.contains_key(r))
            })
            .ok_or(AllocError::Exhausted)?;
        self.leases.insert(rsid, RsidLease { ext, expires_ms });
        debug!(rsid = %rsid, ext = %ext, "Allocated RSID");
        Ok(rsid)
    }

    pub fn owner(&self, rsid: Rsid) -> Option<ExtAddr> {
        self.leases.get(&rsid).map(|l| l.ext)
    }

    pub fn expire(&mut self, now_ms: u64) -> usize {
        let before = self.leases.len();
        self.leases.retain(|_, l| l.expires_ms > now_ms);
        before - self.leases.len()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
