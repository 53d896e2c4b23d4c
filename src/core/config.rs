//! Protocol configuration and parameters.
//!
//! Policy values the liquidation engine and stability pool depend on.
//! Parameters default to the constants in [`crate::utils::constants`], can
//! be loaded from a JSON file and overridden from `CDP_ENGINE_*`
//! environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::math::FixedPoint;

/// Environment variable overriding the MCR
pub const ENV_MCR: &str = "CDP_ENGINE_MCR";
/// Environment variable overriding the CCR
pub const ENV_CCR: &str = "CDP_ENGINE_CCR";
/// Environment variable overriding the liquidation ICR cap
pub const ENV_LICR: &str = "CDP_ENGINE_LICR";
/// Environment variable overriding the minimum net debt
pub const ENV_MIN_NET_DEBT: &str = "CDP_ENGINE_MIN_NET_DEBT";
/// Environment variable overriding the gas compensation divisor
pub const ENV_GAS_COMP_DIVISOR: &str = "CDP_ENGINE_GAS_COMP_DIVISOR";
/// Environment variable overriding the Recovery Mode grace period, in seconds
pub const ENV_RECOVERY_GRACE_PERIOD: &str = "CDP_ENGINE_RECOVERY_GRACE_PERIOD";

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Policy parameters of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Minimum collateralization ratio (MCR)
    /// Below this, positions can be liquidated
    pub mcr: FixedPoint,

    /// Critical collateralization ratio (CCR)
    /// When system TCR falls below this, recovery mode activates
    pub ccr: FixedPoint,

    /// Liquidation ICR cap: collateral seized is at most debt * cap / price
    pub liquidation_icr: FixedPoint,

    /// Minimum debt an active position must carry
    pub min_net_debt: FixedPoint,

    /// Liquidators receive liquidated collateral / this divisor
    pub gas_compensation_divisor: u64,

    /// Seconds Recovery Mode must last before positions at or above MCR
    /// can be liquidated
    pub recovery_grace_period: u64,

    /// Multiplier applied to P on a scale change
    pub scale_factor: u64,

    /// Raw P value below which a scale change is forced
    pub scale_jump_floor: u64,

    /// Maximum events retained by the protocol event log
    pub max_event_log: usize,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            mcr: FixedPoint::from_percentage(MIN_COLLATERAL_RATIO),
            ccr: FixedPoint::from_percentage(CRITICAL_COLLATERAL_RATIO),
            liquidation_icr: FixedPoint::from_percentage(LIQUIDATION_ICR),
            min_net_debt: FixedPoint::from_integer(MIN_NET_DEBT),
            gas_compensation_divisor: GAS_COMPENSATION_DIVISOR,
            recovery_grace_period: RECOVERY_GRACE_PERIOD,
            scale_factor: SCALE_FACTOR as u64,
            scale_jump_floor: SCALE_JUMP_FLOOR as u64,
            max_event_log: MAX_EVENT_LOG,
        }
    }
}

impl ProtocolParams {
    /// Create with custom MCR and CCR (for testing)
    pub fn with_ratios(mut self, mcr: FixedPoint, ccr: FixedPoint) -> Self {
        self.mcr = mcr;
        self.ccr = ccr;
        self
    }

    /// Create with a custom minimum net debt
    pub fn with_min_net_debt(mut self, min_net_debt: FixedPoint) -> Self {
        self.min_net_debt = min_net_debt;
        self
    }

    /// Create with a custom gas compensation divisor
    pub fn with_gas_compensation_divisor(mut self, divisor: u64) -> Self {
        self.gas_compensation_divisor = divisor;
        self
    }

    /// Create with a custom Recovery Mode grace period
    pub fn with_recovery_grace_period(mut self, seconds: u64) -> Self {
        self.recovery_grace_period = seconds;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: String| {
            Err(Error::InvalidParameter {
                name: name.into(),
                reason,
            })
        };

        if self.mcr < FixedPoint::ONE {
            return invalid("mcr", format!("{} is below 1", self.mcr));
        }
        if self.ccr <= self.mcr {
            return invalid("ccr", format!("{} must exceed mcr {}", self.ccr, self.mcr));
        }
        if self.liquidation_icr < FixedPoint::ONE || self.liquidation_icr > self.ccr {
            return invalid(
                "liquidation_icr",
                format!("{} must lie in [1, ccr]", self.liquidation_icr),
            );
        }
        if self.gas_compensation_divisor == 0 {
            return invalid("gas_compensation_divisor", "must be non-zero".into());
        }
        if self.scale_factor < 2 {
            return invalid("scale_factor", "must be at least 2".into());
        }
        if self.scale_jump_floor == 0 || u128::from(self.scale_jump_floor) >= PRECISION {
            return invalid("scale_jump_floor", "must lie in (0, 1e18)".into());
        }
        if self.max_event_log == 0 {
            return invalid("max_event_log", "must be non-zero".into());
        }
        Ok(())
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let params: Self =
            serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Config(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Defaults overridden from `CDP_ENGINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut params = Self::default();
        params.apply_env()?;
        Ok(params)
    }

    /// Override fields from `CDP_ENGINE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override fields from any key lookup, then validate
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fixed = |key: &str| -> Result<Option<FixedPoint>> {
            lookup(key)
                .map(|v| v.parse().map_err(|e: Error| Error::Config(format!("{}: {}", key, e))))
                .transpose()
        };

        if let Some(v) = fixed(ENV_MCR)? {
            self.mcr = v;
        }
        if let Some(v) = fixed(ENV_CCR)? {
            self.ccr = v;
        }
        if let Some(v) = fixed(ENV_LICR)? {
            self.liquidation_icr = v;
        }
        if let Some(v) = fixed(ENV_MIN_NET_DEBT)? {
            self.min_net_debt = v;
        }
        if let Some(raw) = lookup(ENV_GAS_COMP_DIVISOR) {
            self.gas_compensation_divisor = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", ENV_GAS_COMP_DIVISOR, e)))?;
        }
        if let Some(raw) = lookup(ENV_RECOVERY_GRACE_PERIOD) {
            self.recovery_grace_period = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", ENV_RECOVERY_GRACE_PERIOD, e)))?;
        }

        self.validate()
    }
}
