//! Node selection strategies
//!
//! A selector receives the already filtered pool of eligible nodes and picks
//! one per inbound request.

use crate::error::{FleetError, Result};
use fleet_core::NodeId;
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random,
}

impl FromStr for SelectionStrategy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round-robin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            other => Err(FleetError::InvalidStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SelectionStrategy::RoundRobin => write!(f, "round-robin"),
            SelectionStrategy::Random => write!(f, "random"),
        }
    }
}

/// Picks one node out of an eligible pool
pub trait NodeSelector: Send + Sync {
    fn select(&self, pool: &[NodeId]) -> Result<NodeId>;

    fn strategy(&self) -> SelectionStrategy;
}

/// Cycles through nodes in id order.
///
/// The cursor is the last chosen id rather than an index, so nodes joining or
/// leaving between requests do not shift the rotation.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: Mutex<Option<NodeId>>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeSelector for RoundRobinSelector {
    fn select(&self, pool: &[NodeId]) -> Result<NodeId> {
        let mut cursor = self.cursor.lock();

        let after_cursor = |id: &&NodeId| match cursor.as_ref() {
            Some(last) => id.as_str() > last.as_str(),
            None => true,
        };
        let next = pool
            .iter()
            .filter(after_cursor)
            .min()
            .or_else(|| pool.iter().min())
            .cloned()
            .ok_or(FleetError::NoEligibleNode)?;

        *cursor = Some(next.clone());
        Ok(next)
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::RoundRobin
    }
}

/// Uniform choice with the thread-local RNG
#[derive(Debug, Default)]
pub struct RandomSelector;

impl NodeSelector for RandomSelector {
    fn select(&self, pool: &[NodeId]) -> Result<NodeId> {
        if pool.is_empty() {
            return Err(FleetError::NoEligibleNode);
        }
        let index = rand::rng().random_range(0..pool.len());
        Ok(pool[index].clone())
    }

    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::Random
    }
}

pub fn selector_for(strategy: SelectionStrategy) -> Box<dyn NodeSelector> {
    match strategy {
        SelectionStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
        SelectionStrategy::Random => Box::new(RandomSelector),
    }
}
