//! # Walk Configuration
//!
//! Knobs shared by every traversal in a query.
//!
//! Configuration is layered: [`WalkConfig::default`], then the environment
//! ([`WalkConfig::from_env`]), then whatever the caller overrides (the CLI maps
//! `--max-nodes` and `--verify-counts` onto the fields directly).
//!
//! ## Environment Variables
//!
//! - `MEMWALK_MAX_NODES`: node budget per traversal (`0` disables the budget)
//! - `MEMWALK_VERIFY_COUNTS`: `1`/`true` to compare walked entries with stored counts

use std::env;

use tracing::warn;

/// Default node budget per traversal.
///
/// Large enough for any real kernel list; small enough that a cycle is reported
/// within seconds instead of spinning forever.
pub const DEFAULT_MAX_NODES: usize = 1 << 20;

/// Settings for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkConfig
{
    /// Maximum nodes a single traversal may visit before it is reported as
    /// `MalformedStructure`. `None` trusts the target completely.
    pub max_nodes: Option<usize>,
    /// Compare walked entry counts against counts stored in the target and
    /// log mismatches.
    pub verify_counts: bool,
}

impl Default for WalkConfig
{
    fn default() -> Self
    {
        Self {
            max_nodes: Some(DEFAULT_MAX_NODES),
            verify_counts: true,
        }
    }
}

impl WalkConfig
{
    /// Defaults overridden by `MEMWALK_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self
    {
        let mut config = Self::default();

        if let Ok(raw) = env::var("MEMWALK_MAX_NODES") {
            match raw.trim().parse::<usize>() {
                Ok(0) => config.max_nodes = None,
                Ok(limit) => config.max_nodes = Some(limit),
                Err(err) => warn!(value = %raw, error = %err, "ignoring invalid MEMWALK_MAX_NODES"),
            }
        }

        if let Ok(raw) = env::var("MEMWALK_VERIFY_COUNTS") {
            match parse_flag(&raw) {
                Some(flag) => config.verify_counts = flag,
                None => warn!(value = %raw, "ignoring invalid MEMWALK_VERIFY_COUNTS"),
            }
        }

        config
    }

    /// Builder-style override of the node budget (`0` disables it).
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self
    {
        self.max_nodes = (max_nodes != 0).then_some(max_nodes);
        self
    }

    #[must_use]
    pub fn with_verify_counts(mut self, verify_counts: bool) -> Self
    {
        self.verify_counts = verify_counts;
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool>
{
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
