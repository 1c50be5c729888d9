//! Version counter and compatibility rules

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{NetError, NetResult};

/// Shared monotonic version counter owned by a [`crate::NetElementTop`].
///
/// Every leaf holds a clone and records `current()` when it changes.
#[derive(Debug, Clone)]
pub struct NetElementVersion(Arc<AtomicU64>);

impl NetElementVersion {
    /// New counter starting at 1
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(1)))
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance the counter, returning the value before the increment
    #[inline]
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel)
    }
}

impl Default for NetElementVersion {
    fn default() -> Self {
        Self::new()
    }
}

/// Current version of a leaf's owner, or 0 when detached
#[inline]
pub fn current_version(version: &Option<NetElementVersion>) -> u64 {
    version.as_ref().map_or(0, NetElementVersion::current)
}

/// Protocol rules both peers agreed on at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetCompatibilityRules {
    version: u32,
}

impl NetCompatibilityRules {
    /// Newest protocol this build speaks
    pub const LATEST_VERSION: u32 = 2;
    /// Oldest protocol this build still accepts
    pub const MIN_SUPPORTED_VERSION: u32 = 1;

    pub const fn new(version: u32) -> Self {
        Self { version }
    }

    pub const fn latest() -> Self {
        Self::new(Self::LATEST_VERSION)
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn is_legacy(&self) -> bool {
        self.version < Self::LATEST_VERSION
    }

    /// Pick the rules two peers will use, failing if the remote is too old
    /// or the local side cannot serve it
    pub fn negotiate(local: Self, remote: Self) -> NetResult<Self> {
        let agreed = local.version.min(remote.version);
        if agreed < Self::MIN_SUPPORTED_VERSION {
            return Err(NetError::CompatibilityMismatch {
                local: local.version,
                remote: remote.version,
            });
        }
        Ok(Self::new(agreed))
    }
}

impl Default for NetCompatibilityRules {
    fn default() -> Self {
        Self::latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_returns_previous() {
        let v = NetElementVersion::new();
        assert_eq!(v.current(), 1);
        assert_eq!(v.increment(), 1);
        assert_eq!(v.current(), 2);
    }

    #[test]
    fn test_negotiate_picks_older() {
        let local = NetCompatibilityRules::latest();
        let agreed = NetCompatibilityRules::negotiate(local, NetCompatibilityRules::new(1)).unwrap();
        assert_eq!(agreed.version(), 1);
        assert!(agreed.is_legacy());

        let err = NetCompatibilityRules::negotiate(local, NetCompatibilityRules::new(0));
        assert!(matches!(err, Err(NetError::CompatibilityMismatch { .. })));
    }
}
