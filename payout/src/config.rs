//! Scheduled payout configuration

use crate::error::{PayoutError, Result};
use fleet_core::Amount;
use std::fmt;
use std::time::Duration;

/// Upper bound on one transfer run
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Opaque signing secret handed to the transfer collaborator
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Credential(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Credential(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub interval_days: u32,
    pub total_reward: Amount,
    /// Address of the load balancer wallet paying the rewards
    pub lb_address: String,
    /// Separate destination for the load balancer fee, if any
    pub fee_address: Option<String>,
    pub credential: Credential,
    pub transfer_timeout: Duration,
}

impl PayoutConfig {
    pub fn new(
        interval_days: u32,
        total_reward: Amount,
        lb_address: impl Into<String>,
        credential: Credential,
    ) -> Self {
        PayoutConfig {
            interval_days,
            total_reward,
            lb_address: lb_address.into(),
            fee_address: None,
            credential,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_fee_address(mut self, fee_address: impl Into<String>) -> Self {
        self.fee_address = Some(fee_address.into());
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_days == 0 {
            return Err(PayoutError::InvalidConfig(
                "payout interval must be at least one day".to_string(),
            ));
        }
        if self.total_reward.is_zero() {
            return Err(PayoutError::InvalidConfig(
                "total reward must be positive".to_string(),
            ));
        }
        if self.lb_address.trim().is_empty() {
            return Err(PayoutError::InvalidConfig(
                "load balancer address is required".to_string(),
            ));
        }
        if self.fee_address.as_deref() == Some(self.lb_address.as_str()) {
            return Err(PayoutError::InvalidConfig(
                "fee address must differ from the load balancer address".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PayoutConfig {
        PayoutConfig::new(5, Amount::from_tokens(100), "lb-addr", Credential::new("s3cret"))
    }

    #[test]
    fn test_credential_is_redacted() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());
        assert!(config().with_fee_address("fee-addr").validate().is_ok());

        let mut zero_interval = config();
        zero_interval.interval_days = 0;
        assert!(zero_interval.validate().is_err());

        let mut zero_reward = config();
        zero_reward.total_reward = Amount::ZERO;
        assert!(zero_reward.validate().is_err());

        assert!(config().with_fee_address("lb-addr").validate().is_err());
    }
}
