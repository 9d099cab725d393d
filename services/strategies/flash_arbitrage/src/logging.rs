//! Standardized emoji logging for flash arbitrage modules
//!
//! Provides consistent emoji usage across the daemon so pipeline stages are easy
//! to pick out of a busy log, plus the one-time subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Standard emoji set for flash arbitrage logging
pub struct LogEmoji;

impl LogEmoji {
    // Status indicators
    pub const SUCCESS: &'static str = "✅"; // Operation succeeded
    pub const ERROR: &'static str = "❌"; // Operation failed
    pub const WARNING: &'static str = "⚠️"; // Warning or caution

    // Pipeline stages
    pub const SEARCH: &'static str = "🔍"; // Scanning paths
    pub const CHART: &'static str = "📊"; // Metrics
    pub const EXECUTE: &'static str = "⚡"; // Submission
    pub const MONEY: &'static str = "💰"; // Profit
    pub const GAS: &'static str = "⛽"; // Gas price/costs
    pub const CLOCK: &'static str = "⏱️"; // Timeouts/debounce

    // Controller
    pub const TRIGGER: &'static str = "📡"; // Trigger received
    pub const LOCK: &'static str = "🔒"; // Execution state
    pub const BUDGET: &'static str = "🎯"; // Attempt budget
    pub const MODE: &'static str = "🔀"; // Mode switch
    pub const HEALTH: &'static str = "🩺"; // Health check
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow::anyhow!("invalid log level {default_level:?}: {e}"))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

// Convenience macros for standardized logging
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SUCCESS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!("{} {}", $crate::logging::LogEmoji::ERROR, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_search {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SEARCH, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_metrics {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::CHART, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_execution {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::EXECUTE, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_profit {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::MONEY, format!($($arg)*))
    };
}
