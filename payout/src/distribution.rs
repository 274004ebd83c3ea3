//! Reward distribution
//!
//! The load balancer keeps `reward * fee` and the rest is split between
//! nodes proportionally to their successful requests. All arithmetic is done
//! in base units and rounds down, so at most one base unit per node is left
//! undistributed.

use fleet_core::{Amount, FeeRate, NodeId};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub total_reward: Amount,
    pub lb_fee: Amount,
    pub shares: BTreeMap<NodeId, Amount>,
}

impl Distribution {
    pub fn nodes_total(&self) -> Amount {
        self.shares.values().copied().sum()
    }

    /// Reward left unassigned by rounding
    pub fn remainder(&self) -> Amount {
        self.total_reward
            .saturating_sub(self.lb_fee)
            .saturating_sub(self.nodes_total())
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

/// Split `total_reward` between the load balancer fee and the nodes.
///
/// Nodes with zero successful requests get nothing. With no traffic at all
/// the node shares are empty.
pub fn calculate_distribution(
    total_reward: Amount,
    fee: FeeRate,
    successful_requests: &BTreeMap<NodeId, u64>,
) -> Distribution {
    let lb_fee = total_reward.apply_rate(fee);
    let node_pool = total_reward.saturating_sub(lb_fee);
    let total_requests: u128 = successful_requests.values().map(|&c| c as u128).sum();

    let shares = if total_requests == 0 {
        BTreeMap::new()
    } else {
        successful_requests
            .iter()
            .filter(|(_, &count)| count > 0)
            .map(|(id, &count)| (id.clone(), node_pool.mul_div(count as u128, total_requests)))
            .collect()
    };

    Distribution {
        total_reward,
        lb_fee,
        shares,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, u64)]) -> BTreeMap<NodeId, u64> {
        entries.iter().map(|(id, c)| (id.to_string(), *c)).collect()
    }

    #[test]
    fn test_proportional_split_with_fee() {
        let distribution = calculate_distribution(
            Amount::from_tokens(100),
            FeeRate::from_fraction(0.1).unwrap(),
            &counts(&[("A", 3), ("B", 1)]),
        );

        assert_eq!(distribution.lb_fee, Amount::from_tokens(10));
        assert_eq!(distribution.shares["A"], "67.5".parse::<Amount>().unwrap());
        assert_eq!(distribution.shares["B"], "22.5".parse::<Amount>().unwrap());
        assert!(distribution.remainder().is_zero());
    }

    #[test]
    fn test_zero_traffic_gives_empty_distribution() {
        let distribution = calculate_distribution(
            Amount::from_tokens(100),
            FeeRate::from_fraction(0.1).unwrap(),
            &counts(&[("A", 0)]),
        );
        assert!(distribution.is_empty());
        assert_eq!(distribution.lb_fee, Amount::from_tokens(10));
    }

    #[test]
    fn test_rounding_remainder_is_bounded() {
        let total = Amount::from_base_units(100);
        let distribution = calculate_distribution(
            total,
            FeeRate::from_fraction(0.0).unwrap(),
            &counts(&[("A", 1), ("B", 1), ("C", 1)]),
        );

        assert_eq!(distribution.shares["A"], Amount::from_base_units(33));
        assert_eq!(distribution.remainder(), Amount::from_base_units(1));
        assert!(distribution.remainder().base_units() <= distribution.shares.len() as u128);
    }

    #[test]
    fn test_full_fee_leaves_nothing_for_nodes() {
        let distribution = calculate_distribution(
            Amount::from_tokens(50),
            FeeRate::from_fraction(1.0).unwrap(),
            &counts(&[("A", 10)]),
        );
        assert_eq!(distribution.lb_fee, Amount::from_tokens(50));
        assert!(distribution.shares["A"].is_zero());
    }
}
