//! Port pool for tunnel termination
//!
//! Hands out ports from a fixed `min:max` range, lowest free port first.
//! The range size is the hard ceiling on concurrently connected nodes.

use crate::error::PoolError;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    /// Number of ports in the range, bounds included
    pub fn size(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl FromStr for PortRange {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || PoolError::InvalidRange(value.to_string());

        let (min, max) = value.trim().split_once(':').ok_or_else(invalid)?;
        let min: u16 = min.trim().parse().map_err(|_| invalid())?;
        let max: u16 = max.trim().parse().map_err(|_| invalid())?;

        if min == 0 || min >= max {
            return Err(invalid());
        }
        Ok(PortRange { min, max })
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

#[derive(Debug)]
pub struct AddrPool {
    range: PortRange,
    free: Mutex<BTreeSet<u16>>,
}

impl AddrPool {
    pub fn new(range: PortRange) -> Self {
        AddrPool {
            range,
            free: Mutex::new((range.min..=range.max).collect()),
        }
    }

    /// Parse a `"min:max"` range and build a pool over it
    pub fn init(value: &str) -> Result<Self, PoolError> {
        Ok(Self::new(value.parse()?))
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Maximum number of ports that can be allocated at once
    pub fn capacity(&self) -> usize {
        self.range.size()
    }

    /// Take the lowest free port
    pub fn acquire(&self) -> Result<u16, PoolError> {
        let port = self.free.lock().pop_first().ok_or(PoolError::Exhausted {
            min: self.range.min,
            max: self.range.max,
        })?;
        debug!(port, "port acquired");
        Ok(port)
    }

    /// Return a port to the pool. Releasing a free or foreign port is a no-op.
    pub fn release(&self, port: u16) {
        if !self.range.contains(port) {
            debug!(port, range = %self.range, "ignoring release of port outside range");
            return;
        }
        if self.free.lock().insert(port) {
            debug!(port, "port released");
        }
    }

    pub fn allocated_count(&self) -> usize {
        self.capacity() - self.free.lock().len()
    }

    pub fn available_count(&self) -> usize {
        self.free.lock().len()
    }
}
