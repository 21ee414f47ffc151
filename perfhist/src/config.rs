//! # Report Configuration
//!
//! Everything that shapes aggregation is decided once, up front, and carried
//! in a [`ReportConfig`] shared as `Arc<ReportConfig>` by every table of a
//! session. Nothing in the engine reads process-wide state.
//!
//! ```text
//! CLI args ──► ReportConfigBuilder ──► validate ──► Arc<ReportConfig>
//!                                                     │
//!                      ┌──────────────────────────────┼──────────────┐
//!                      ▼                              ▼              ▼
//!               HistogramTable #0             HistogramTable #1   SampleProcessor
//! ```

use perfhist_common::{DEFAULT_CACHELINE_SIZE, DEFAULT_MAX_STACK, LOOP_HASH_SIZE, MAX_BRANCH_DEPTH};

use crate::domain::ConfigError;
use crate::sort::SortKeyList;

/// Sort order used when none is given.
pub const DEFAULT_SORT_ORDER: &str = "comm,dso,symbol";

/// Callchain option string used when none is given.
pub const DEFAULT_CALLCHAIN: &str = "graph,0.5,callee,function";

// =============================================================================
// DECAY
// =============================================================================

/// Exponential decay factor `numerator / denominator` applied per aging pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecayParam {
    pub numerator: u64,
    pub denominator: u64,
}

impl Default for DecayParam {
    fn default() -> Self {
        Self {
            numerator: 7,
            denominator: 8,
        }
    }
}

impl DecayParam {
    pub fn new(numerator: u64, denominator: u64) -> Result<Self, ConfigError> {
        if denominator == 0 || numerator >= denominator {
            return Err(ConfigError::InvalidDecay {
                numerator,
                denominator,
            });
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Scale `value` by the factor, rounding down.
    #[must_use]
    pub fn apply(self, value: u64) -> u64 {
        let scaled =
            u128::from(value) * u128::from(self.numerator) / u128::from(self.denominator);
        // numerator < denominator, so the result never exceeds `value`
        u64::try_from(scaled).unwrap_or(value)
    }
}

// =============================================================================
// CALLCHAIN PARAMETERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallchainMode {
    /// Thresholds relative to the grand total.
    GraphAbs,
    /// Thresholds relative to the parent node.
    GraphRel,
    Flat,
    Folded,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallchainOrder {
    /// Root (outermost caller) first.
    Caller,
    /// Leaf (sampled function) first.
    Callee,
}

/// What makes two callchain frames "the same" when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallchainKey {
    Function,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallchainParam {
    pub mode: CallchainMode,
    /// Minimum cumulative share, in percent, for a child to be shown.
    pub min_percent: f64,
    pub order: CallchainOrder,
    pub key: CallchainKey,
    /// Maximum children shown per node, 0 for unlimited.
    pub print_limit: usize,
    /// Prepend branch-stack frames to the callchain.
    pub branch_callstack: bool,
    pub max_stack: usize,
}

impl Default for CallchainParam {
    fn default() -> Self {
        Self {
            mode: CallchainMode::GraphRel,
            min_percent: 0.5,
            order: CallchainOrder::Callee,
            key: CallchainKey::Function,
            print_limit: 0,
            branch_callstack: false,
            max_stack: DEFAULT_MAX_STACK,
        }
    }
}

impl CallchainParam {
    /// Parse a `"graph,0.5,caller,function"` style option string.
    ///
    /// Tokens may come in any order. The first number is the minimum
    /// percentage, a second one the print limit. `fractal` selects relative
    /// thresholds, `graph` absolute ones.
    pub fn parse(opts: &str) -> Result<Self, ConfigError> {
        let mut param = Self::default();
        let mut seen_percent = false;
        for token in opts.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token {
                "graph" => param.mode = CallchainMode::GraphAbs,
                "fractal" => param.mode = CallchainMode::GraphRel,
                "flat" => param.mode = CallchainMode::Flat,
                "folded" => param.mode = CallchainMode::Folded,
                "none" => param.mode = CallchainMode::None,
                "caller" => param.order = CallchainOrder::Caller,
                "callee" => param.order = CallchainOrder::Callee,
                "function" => param.key = CallchainKey::Function,
                "address" => param.key = CallchainKey::Address,
                "branch" => param.branch_callstack = true,
                _ if !seen_percent => {
                    let min_percent: f64 = token
                        .parse()
                        .map_err(|_| ConfigError::InvalidCallchainOption(token.to_string()))?;
                    if !(0.0..=100.0).contains(&min_percent) {
                        return Err(ConfigError::InvalidCallchainOption(token.to_string()));
                    }
                    param.min_percent = min_percent;
                    seen_percent = true;
                }
                _ => {
                    param.print_limit = token
                        .parse()
                        .map_err(|_| ConfigError::InvalidCallchainOption(token.to_string()))?;
                }
            }
        }
        Ok(param)
    }
}

// =============================================================================
// REPORT CONFIG
// =============================================================================

#[derive(Debug)]
pub struct ReportConfig {
    pub sort: SortKeyList,
    pub use_callchain: bool,
    pub callchain: CallchainParam,
    /// Substring identifying "parent" symbols in callchains.
    pub parent_pattern: Option<String>,
    /// Hide entries without a parent.
    pub exclude_other: bool,
    pub hide_unresolved: bool,
    pub decay: DecayParam,
    pub loop_hash_size: usize,
    pub max_branch_depth: usize,
    pub cacheline_size: u64,
}

impl ReportConfig {
    #[must_use]
    pub fn builder() -> ReportConfigBuilder {
        ReportConfigBuilder::default()
    }

    /// Default config sorted by `sort`.
    pub fn with_sort(sort: &str) -> Result<Self, ConfigError> {
        Self::builder().sort(sort).build()
    }
}

/// Collects options as strings and validates everything in [`build`].
///
/// [`build`]: ReportConfigBuilder::build
#[derive(Debug, Clone)]
pub struct ReportConfigBuilder {
    sort: String,
    callchain: Option<String>,
    parent_pattern: Option<String>,
    exclude_other: bool,
    hide_unresolved: bool,
    decay: (u64, u64),
    loop_hash_size: usize,
    max_branch_depth: usize,
    cacheline_size: u64,
}

impl Default for ReportConfigBuilder {
    fn default() -> Self {
        let decay = DecayParam::default();
        Self {
            sort: DEFAULT_SORT_ORDER.to_string(),
            callchain: None,
            parent_pattern: None,
            exclude_other: false,
            hide_unresolved: false,
            decay: (decay.numerator, decay.denominator),
            loop_hash_size: LOOP_HASH_SIZE,
            max_branch_depth: MAX_BRANCH_DEPTH,
            cacheline_size: DEFAULT_CACHELINE_SIZE,
        }
    }
}

impl ReportConfigBuilder {
    #[must_use]
    pub fn sort(mut self, spec: &str) -> Self {
        self.sort = spec.to_string();
        self
    }

    /// Enable callchain aggregation with the given option string.
    #[must_use]
    pub fn callchain(mut self, opts: &str) -> Self {
        self.callchain = Some(opts.to_string());
        self
    }

    #[must_use]
    pub fn parent(mut self, pattern: &str, exclude_other: bool) -> Self {
        self.parent_pattern = Some(pattern.to_string());
        self.exclude_other = exclude_other;
        self
    }

    #[must_use]
    pub fn hide_unresolved(mut self, hide: bool) -> Self {
        self.hide_unresolved = hide;
        self
    }

    #[must_use]
    pub fn decay(mut self, numerator: u64, denominator: u64) -> Self {
        self.decay = (numerator, denominator);
        self
    }

    #[must_use]
    pub fn loop_hash_size(mut self, size: usize) -> Self {
        self.loop_hash_size = size;
        self
    }

    #[must_use]
    pub fn max_branch_depth(mut self, depth: usize) -> Self {
        self.max_branch_depth = depth;
        self
    }

    #[must_use]
    pub fn cacheline_size(mut self, size: u64) -> Self {
        self.cacheline_size = size;
        self
    }

    pub fn build(self) -> Result<ReportConfig, ConfigError> {
        if !self.cacheline_size.is_power_of_two() {
            return Err(ConfigError::InvalidCachelineSize(self.cacheline_size));
        }
        if self.loop_hash_size == 0 {
            return Err(ConfigError::InvalidLoopHashSize(self.loop_hash_size));
        }
        if self.max_branch_depth >= 255 {
            return Err(ConfigError::InvalidBranchDepth(self.max_branch_depth));
        }
        let sort = SortKeyList::parse(&self.sort, self.cacheline_size)?;
        let (use_callchain, callchain) = match &self.callchain {
            Some(opts) => {
                let param = CallchainParam::parse(opts)?;
                (param.mode != CallchainMode::None, param)
            }
            None => (false, CallchainParam::default()),
        };
        Ok(ReportConfig {
            sort,
            use_callchain,
            callchain,
            parent_pattern: self.parent_pattern,
            exclude_other: self.exclude_other,
            hide_unresolved: self.hide_unresolved,
            decay: DecayParam::new(self.decay.0, self.decay.1)?,
            loop_hash_size: self.loop_hash_size,
            max_branch_depth: self.max_branch_depth,
            cacheline_size: self.cacheline_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decay_param_validation() {
        assert!(DecayParam::new(7, 8).is_ok());
        assert_eq!(
            DecayParam::new(8, 8),
            Err(ConfigError::InvalidDecay {
                numerator: 8,
                denominator: 8
            })
        );
        assert!(DecayParam::new(1, 0).is_err());
    }

    #[test]
    fn test_decay_apply_large_values() {
        let decay = DecayParam::default();
        assert_eq!(decay.apply(8), 7);
        assert_eq!(decay.apply(1), 0);
        assert_eq!(decay.apply(u64::MAX), u64::MAX / 8 * 7 + 6);
    }

    #[test]
    fn test_callchain_parse_any_order() {
        let param = CallchainParam::parse("caller,graph,2.5,address,10").unwrap();
        assert_eq!(param.mode, CallchainMode::GraphAbs);
        assert_eq!(param.order, CallchainOrder::Caller);
        assert_eq!(param.key, CallchainKey::Address);
        assert!((param.min_percent - 2.5).abs() < f64::EPSILON);
        assert_eq!(param.print_limit, 10);
    }

    #[test]
    fn test_callchain_parse_rejects_garbage() {
        assert!(matches!(
            CallchainParam::parse("graph,sideways"),
            Err(ConfigError::InvalidCallchainOption(tok)) if tok == "sideways"
        ));
        assert!(CallchainParam::parse("150").is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let config = ReportConfig::builder().build().unwrap();
        assert!(!config.use_callchain);
        assert_eq!(config.decay, DecayParam::default());
        assert_eq!(config.loop_hash_size, 127);
        assert!(config.sort.contains("symbol"));
    }

    #[test]
    fn test_builder_callchain_none_disables() {
        let config = ReportConfig::builder().callchain("none").build().unwrap();
        assert!(!config.use_callchain);
        let config = ReportConfig::builder().callchain("fractal").build().unwrap();
        assert!(config.use_callchain);
        assert_eq!(config.callchain.mode, CallchainMode::GraphRel);
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        assert!(ReportConfig::builder().cacheline_size(48).build().is_err());
        assert!(ReportConfig::builder().loop_hash_size(0).build().is_err());
        assert!(ReportConfig::builder().max_branch_depth(300).build().is_err());
        assert!(matches!(
            ReportConfig::with_sort("comm,bogus"),
            Err(ConfigError::UnknownSortKey(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_builder_rejects_metric_only_sort() {
        assert!(matches!(
            ReportConfig::with_sort("period"),
            Err(ConfigError::NoIdentitySortKey(spec)) if spec == "period"
        ));
        assert!(ReportConfig::with_sort("period,symbol").is_ok());
    }
}
