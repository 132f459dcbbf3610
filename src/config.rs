//! # Configuration
//!
//! Plain structs with public fields and `Default` impls. Nothing here reads
//! the environment; the host builds a config and passes it in.
//!
//! ```rust,ignore
//! let config = DocumentConfig {
//!     max_history: 500,
//!     backend: Backend::Native { program: "litedit-worker".into() },
//!     ..Default::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Default per-call RPC timeout in milliseconds.
///
/// Guards against a remote context that died without closing its channel.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default number of modifications a document remembers for undo.
pub const DEFAULT_MAX_HISTORY: usize = crate::tracker::DEFAULT_MAX_ENTRIES;

/// Default number of records the audit log keeps.
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Default timeout for a native worker health check in milliseconds.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// RPC
// =============================================================================

/// Settings for one RPC channel.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// How long a call waits for its result envelope.
    pub call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

// =============================================================================
// Backend Selection
// =============================================================================

/// Which `DatabaseOperations` implementation a document connects to.
#[derive(Debug, Clone, Default)]
pub enum Backend {
    /// Engine on a dedicated thread in this process.
    #[default]
    Worker,

    /// Engine in a child process speaking length-prefixed frames over stdio.
    Native {
        /// Path to the `litedit-worker` executable.
        program: PathBuf,
    },
}

// =============================================================================
// Document
// =============================================================================

/// Settings for an open document.
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub rpc: RpcConfig,

    /// Undo history capacity.
    pub max_history: usize,

    pub backend: Backend,

    /// Timeout for [`crate::native::NativeDatabase::health_check`].
    pub health_check_timeout: Duration,

    /// Audit log attached to the document's backend.
    pub audit: AuditConfig,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            max_history: DEFAULT_MAX_HISTORY,
            backend: Backend::default(),
            health_check_timeout: Duration::from_millis(DEFAULT_HEALTH_CHECK_TIMEOUT_MS),
            audit: AuditConfig::default(),
        }
    }
}

// =============================================================================
// Audit
// =============================================================================

/// Settings for the audit decorator.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Maximum records kept in memory; older ones are dropped first.
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}
