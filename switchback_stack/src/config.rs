//! Stack allocation configuration.
//!
//! All sizes are tunable. Defaults favor many concurrent stacks: a large
//! virtual reservation that costs physical memory only as it is touched.

use parking_lot::RwLock;

/// Configuration for growable-stack allocation.
///
/// # Example
///
/// ```ignore
/// use switchback_stack::StackConfig;
///
/// // Small stacks for a test harness
/// let config = StackConfig {
///     reserve_size: 256 * 1024,
///     cache_count: 0,
///     ..Default::default()
/// };
/// switchback_stack::init(&config)?;
/// ```
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Virtual address space reserved per stack, in bytes.
    ///
    /// This is the upper bound on how far a stack can grow. Reservation is
    /// cheap; physical pages are committed on demand.
    ///
    /// Default: 8MB
    pub reserve_size: usize,

    /// Bytes pre-faulted at the base of a fresh stack when `lazy_commit`
    /// is off.
    ///
    /// Default: 64KB
    pub initial_commit: usize,

    /// Place an inaccessible guard page below the stack so that overflow
    /// faults instead of silently corrupting an adjacent mapping.
    ///
    /// Default: true
    pub guard_pages: bool,

    /// Number of released stacks kept per thread for reuse.
    ///
    /// Reused stacks skip the mmap round-trip; their physical pages are
    /// returned to the OS while cached. Set to 0 to disable caching.
    ///
    /// Default: 4
    pub cache_count: usize,

    /// Let the OS commit pages on first touch instead of pre-faulting
    /// `initial_commit` bytes up front.
    ///
    /// Default: true
    pub lazy_commit: bool,

    /// Allow panics to propagate across a stack boundary.
    ///
    /// When off, a panic reaching the base of a growable stack is fatal
    /// rather than tunneled to the parent stack.
    ///
    /// Default: true
    pub exception_propagation: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            reserve_size: 8 * 1024 * 1024,
            initial_commit: 64 * 1024,
            guard_pages: true,
            cache_count: 4,
            lazy_commit: true,
            exception_propagation: true,
        }
    }
}

impl StackConfig {
    /// Configuration for memory-constrained hosts: small reservations and
    /// no reuse cache.
    pub fn low_memory() -> Self {
        Self {
            reserve_size: 512 * 1024,
            initial_commit: 16 * 1024,
            cache_count: 0,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reserve_size < 64 * 1024 {
            return Err(ConfigError::ReserveTooSmall);
        }
        if self.initial_commit > self.reserve_size {
            return Err(ConfigError::CommitExceedsReserve);
        }
        if self.cache_count > 64 {
            return Err(ConfigError::CacheTooLarge);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Reserve size is too small (minimum 64KB).
    ReserveTooSmall,
    /// Initial commit exceeds the reserve size.
    CommitExceedsReserve,
    /// Per-thread cache count exceeds 64.
    CacheTooLarge,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReserveTooSmall => write!(f, "stack reserve size must be at least 64KB"),
            ConfigError::CommitExceedsReserve => {
                write!(f, "initial commit must not exceed the reserve size")
            }
            ConfigError::CacheTooLarge => write!(f, "stack cache count must be at most 64"),
        }
    }
}

impl std::error::Error for ConfigError {}

static CONFIG: RwLock<Option<StackConfig>> = RwLock::new(None);

pub(crate) fn install(config: StackConfig) {
    *CONFIG.write() = Some(config);
}

/// The currently installed configuration, or the defaults if [`crate::init`]
/// was never called.
pub fn current() -> StackConfig {
    CONFIG.read().clone().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StackConfig::default().validate().is_ok());
        assert!(StackConfig::low_memory().validate().is_ok());
    }

    #[test]
    fn init_installs_a_valid_config() {
        // Installing the defaults again is idempotent and must succeed.
        crate::init(&StackConfig::default()).expect("defaults are valid");
        assert_eq!(current().reserve_size, StackConfig::default().reserve_size);
    }

    #[test]
    fn tiny_reserve_rejected() {
        let config = StackConfig {
            reserve_size: 4096,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ReserveTooSmall));
    }

    #[test]
    fn commit_beyond_reserve_rejected() {
        let config = StackConfig {
            reserve_size: 128 * 1024,
            initial_commit: 256 * 1024,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::CommitExceedsReserve));
    }
}
