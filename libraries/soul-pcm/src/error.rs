//! Plugin error types
use thiserror::Error;

/// Result type alias using [`PluginError`]
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors a plugin can return from build-time construction or from a
/// `transfer` call.
///
/// Variants map onto the POSIX-style negative error codes the plugin
/// contract specifies; use [`PluginError::code`] to recover the integer a
/// C-ABI caller would expect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Build-time configuration is invalid: mismatched channel counts,
    /// equal/unequal rates where the plugin requires the opposite, an
    /// out-of-range transfer-table weight, or a misaligned area at transfer
    /// time.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required pointer-equivalent (slice) was absent where data was
    /// expected.
    #[error("null or missing argument: {0}")]
    Fault(String),
}

impl PluginError {
    /// The POSIX-style negative error code a caller following the
    /// plugin contract's `-errno` convention expects.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            PluginError::InvalidArgument(_) => -22, // -EINVAL
            PluginError::Fault(_) => -14,           // -EFAULT
        }
    }
}
