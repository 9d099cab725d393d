//! EXTREME → NORMAL operating mode latch
//!
//! The process starts in EXTREME (bootstrap) mode: a small attempt cap, a minimum
//! block gap between attempts, strict thresholds. It leaves EXTREME for good after a
//! number of successes, its attempt cap, or a wall-clock timeout, whichever comes
//! first. Only broadcast attempts are recorded here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use types::{ModeParams, OperatingMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtremeModeConfig {
    /// Start in NORMAL when false
    pub enabled: bool,
    pub max_attempts: u32,
    pub success_target: u32,
    pub timeout_secs: u64,
    pub min_blocks_between_attempts: u64,
}

impl Default for ExtremeModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            success_target: 3,
            timeout_secs: 6 * 60 * 60,
            min_blocks_between_attempts: 3,
        }
    }
}

/// Threshold sets for both modes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSet {
    pub extreme: ModeParams,
    pub normal: ModeParams,
}

impl Default for ModeSet {
    fn default() -> Self {
        Self {
            extreme: ModeParams::extreme(),
            normal: ModeParams::normal(),
        }
    }
}

impl ModeSet {
    pub fn validate(&self) -> anyhow::Result<()> {
        for params in [&self.extreme, &self.normal] {
            if params.min_profit_usd < Decimal::ZERO {
                anyhow::bail!("{} min_profit_usd must be non-negative", params.mode);
            }
            if params.profit_to_gas_ratio < Decimal::ZERO {
                anyhow::bail!("{} profit_to_gas_ratio must be non-negative", params.mode);
            }
            if params.slippage_tolerance < Decimal::ZERO || params.slippage_tolerance >= Decimal::ONE {
                anyhow::bail!("{} slippage_tolerance must be in [0, 1)", params.mode);
            }
            if params.max_price_impact <= Decimal::ZERO || params.max_price_impact >= Decimal::ONE {
                anyhow::bail!("{} max_price_impact must be in (0, 1)", params.mode);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchReason {
    SuccessTarget { successes: u32 },
    AttemptCap { attempts: u32 },
    Timeout { elapsed_secs: u64 },
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchReason::SuccessTarget { successes } => write!(f, "{successes} successful attempts"),
            SwitchReason::AttemptCap { attempts } => write!(f, "attempt cap reached ({attempts})"),
            SwitchReason::Timeout { elapsed_secs } => write!(f, "timeout after {elapsed_secs}s"),
        }
    }
}

#[derive(Debug)]
pub struct ModeController {
    config: ExtremeModeConfig,
    modes: ModeSet,
    current: OperatingMode,
    started_at: Instant,
    attempts: u32,
    successes: u32,
    last_attempt_block: Option<u64>,
}

impl ModeController {
    pub fn new(config: ExtremeModeConfig, modes: ModeSet, now: Instant) -> Self {
        let current = if config.enabled {
            OperatingMode::Extreme
        } else {
            OperatingMode::Normal
        };
        Self {
            config,
            modes,
            current,
            started_at: now,
            attempts: 0,
            successes: 0,
            last_attempt_block: None,
        }
    }

    pub fn current(&self) -> OperatingMode {
        self.current
    }

    pub fn params(&self) -> &ModeParams {
        match self.current {
            OperatingMode::Extreme => &self.modes.extreme,
            OperatingMode::Normal => &self.modes.normal,
        }
    }

    /// EXTREME block gap; always true in NORMAL
    pub fn may_attempt(&self, block: u64) -> bool {
        if self.current == OperatingMode::Normal {
            return true;
        }
        self.last_attempt_block
            .map_or(true, |last| block.saturating_sub(last) >= self.config.min_blocks_between_attempts)
    }

    /// Count one broadcast attempt. Returns the reason if this switched modes.
    pub fn record_attempt(&mut self, block: u64, success: bool, now: Instant) -> Option<SwitchReason> {
        if self.current == OperatingMode::Normal {
            return None;
        }
        self.attempts += 1;
        if success {
            self.successes += 1;
        }
        self.last_attempt_block = Some(block);

        if self.successes >= self.config.success_target {
            return self.switch(SwitchReason::SuccessTarget {
                successes: self.successes,
            });
        }
        if self.attempts >= self.config.max_attempts {
            return self.switch(SwitchReason::AttemptCap {
                attempts: self.attempts,
            });
        }
        self.check_timeout(now)
    }

    pub fn check_timeout(&mut self, now: Instant) -> Option<SwitchReason> {
        if self.current == OperatingMode::Normal {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.started_at);
        if elapsed >= Duration::from_secs(self.config.timeout_secs) {
            return self.switch(SwitchReason::Timeout {
                elapsed_secs: elapsed.as_secs(),
            });
        }
        None
    }

    fn switch(&mut self, reason: SwitchReason) -> Option<SwitchReason> {
        self.current = OperatingMode::Normal;
        Some(reason)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: ExtremeModeConfig) -> (ModeController, Instant) {
        let now = Instant::now();
        (ModeController::new(config, ModeSet::default(), now), now)
    }

    #[test]
    fn test_attempt_cap_switches_for_good() {
        let (mut mode, now) = controller(ExtremeModeConfig {
            max_attempts: 2,
            ..Default::default()
        });

        assert_eq!(mode.record_attempt(10, true, now), None);
        assert_eq!(
            mode.record_attempt(20, true, now),
            Some(SwitchReason::AttemptCap { attempts: 2 })
        );
        assert_eq!(mode.current(), OperatingMode::Normal);

        // Nothing brings EXTREME back
        for block in 21..30 {
            assert_eq!(mode.record_attempt(block, false, now), None);
        }
        assert_eq!(mode.check_timeout(now + Duration::from_secs(1 << 20)), None);
        assert_eq!(mode.current(), OperatingMode::Normal);
        assert_eq!(mode.params().mode, OperatingMode::Normal);
    }

    #[test]
    fn test_success_target_wins_over_cap() {
        let (mut mode, now) = controller(ExtremeModeConfig {
            max_attempts: 3,
            success_target: 3,
            ..Default::default()
        });
        mode.record_attempt(1, true, now);
        mode.record_attempt(5, true, now);
        assert_eq!(
            mode.record_attempt(9, true, now),
            Some(SwitchReason::SuccessTarget { successes: 3 })
        );
    }

    #[test]
    fn test_block_gap_only_in_extreme() {
        let (mut mode, now) = controller(ExtremeModeConfig::default());
        assert!(mode.may_attempt(100));
        mode.record_attempt(100, false, now);
        assert!(!mode.may_attempt(102));
        assert!(mode.may_attempt(103));

        let (normal, _) = controller(ExtremeModeConfig {
            enabled: false,
            ..Default::default()
        });
        assert_eq!(normal.current(), OperatingMode::Normal);
        assert!(normal.may_attempt(0));
    }

    #[test]
    fn test_timeout_switches() {
        let (mut mode, now) = controller(ExtremeModeConfig {
            timeout_secs: 60,
            ..Default::default()
        });
        assert_eq!(mode.check_timeout(now + Duration::from_secs(59)), None);
        assert_eq!(
            mode.check_timeout(now + Duration::from_secs(60)),
            Some(SwitchReason::Timeout { elapsed_secs: 60 })
        );
    }
}
