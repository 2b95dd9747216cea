//! Error types for phibridge.
//!
//! Every failure a host call can observe is a variant of [`BridgeError`].
//! The module reports failure only through its `0` sentinel, so the core
//! protocol variants (`AllocationFailure`, `CallFailed`) carry no reason
//! beyond the function name or size involved.

use thiserror::Error;

/// The main error type for phibridge operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // =========================================================================
    // Call Protocol Errors (B001-B099)
    // =========================================================================
    /// The module allocator returned the null sentinel.
    #[error("B001: Module allocator failed to provide {requested} bytes")]
    AllocationFailure {
        /// Number of bytes requested from `malloc`.
        requested: u64,
    },

    /// An exported codec function returned the failure sentinel.
    #[error("B002: Module function '{function}' returned the failure sentinel")]
    CallFailed {
        /// The export that failed.
        function: String,
    },

    /// Response bytes are not a valid encoding for the chosen codec.
    #[error("B003: Failed to decode payload: {cause}")]
    DecodeFailure {
        /// Description of the malformed input.
        cause: String,
    },

    /// A record cannot be expressed in the chosen codec.
    #[error("B004: Failed to encode record: {cause}")]
    EncodeFailure {
        /// Why the record could not be encoded.
        cause: String,
    },

    /// The module has no export for the requested record kind.
    #[error("B005: Module does not export '{function}' for record kind '{kind}'")]
    UnknownFunction {
        /// The record kind that was requested.
        kind: String,
        /// The export name that was looked up.
        function: String,
    },

    // =========================================================================
    // Memory Errors (B100-B199)
    // =========================================================================
    /// A read or write fell outside the module's linear memory.
    #[error("B101: Invalid module memory access at offset {offset} (size {size}): {cause}")]
    MemoryAccess {
        /// Offset of the attempted access.
        offset: u64,
        /// Length of the attempted access.
        size: u64,
        /// Reason the access was refused.
        cause: String,
    },

    // =========================================================================
    // Configuration Errors (B200-B299)
    // =========================================================================
    /// A required export (memory, allocator) is missing or has the wrong type.
    #[error("B201: Module export '{export}' unavailable: {cause}")]
    MissingExport {
        /// The export name.
        export: String,
        /// Why it could not be bound.
        cause: String,
    },

    /// The ABI configuration is internally inconsistent.
    #[error("B202: Invalid ABI configuration: {cause}")]
    InvalidAbi {
        /// Description of the inconsistency.
        cause: String,
    },

    /// A configuration value could not be parsed.
    #[error("B203: Invalid configuration value for '{key}': {cause}")]
    Config {
        /// The configuration key.
        key: String,
        /// Why the value was rejected.
        cause: String,
    },

    // =========================================================================
    // Runtime Errors (B300-B399)
    // =========================================================================
    /// Failed to compile or instantiate the module.
    #[error("B301: Failed to load module '{module}': {cause}")]
    WasmLoad {
        /// The module that failed to load.
        module: String,
        /// Reason for the load failure.
        cause: String,
    },

    /// The module trapped while executing an export.
    #[error("B302: Module trapped in '{function}': {cause}")]
    Trap {
        /// The export that was executing.
        function: String,
        /// Trap description reported by the runtime.
        cause: String,
    },

    /// The bridge was used after a trap left the instance in an unknown state.
    #[error("B303: Bridge instance is poisoned by an earlier trap")]
    Poisoned,
}

impl BridgeError {
    /// Get the error code (e.g., "B001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailure { .. } => "B001",
            Self::CallFailed { .. } => "B002",
            Self::DecodeFailure { .. } => "B003",
            Self::EncodeFailure { .. } => "B004",
            Self::UnknownFunction { .. } => "B005",
            Self::MemoryAccess { .. } => "B101",
            Self::MissingExport { .. } => "B201",
            Self::InvalidAbi { .. } => "B202",
            Self::Config { .. } => "B203",
            Self::WasmLoad { .. } => "B301",
            Self::Trap { .. } => "B302",
            Self::Poisoned => "B303",
        }
    }

    /// Check if the error comes from misconfiguration rather than a call.
    ///
    /// Configuration errors are never fixed by calling again.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownFunction { .. }
                | Self::MissingExport { .. }
                | Self::InvalidAbi { .. }
                | Self::Config { .. }
                | Self::WasmLoad { .. }
        )
    }

    /// Check if the bridge instance must be discarded after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Trap { .. } | Self::Poisoned)
    }

    /// Create a decode failure from any displayable cause.
    pub fn decode(cause: impl std::fmt::Display) -> Self {
        Self::DecodeFailure {
            cause: cause.to_string(),
        }
    }

    /// Create an encode failure from any displayable cause.
    pub fn encode(cause: impl std::fmt::Display) -> Self {
        Self::EncodeFailure {
            cause: cause.to_string(),
        }
    }
}

/// Result type alias using `BridgeError`.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = BridgeError::AllocationFailure { requested: 16 };
        assert_eq!(err.code(), "B001");

        let err = BridgeError::UnknownFunction {
            kind: "does_not_exist".to_string(),
            function: "parse_does_not_exist".to_string(),
        };
        assert_eq!(err.code(), "B005");
        assert_eq!(BridgeError::Poisoned.code(), "B303");
    }

    #[test]
    fn error_display() {
        let err = BridgeError::CallFailed {
            function: "parse_user".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("B002"));
        assert!(msg.contains("parse_user"));
    }

    #[test]
    fn config_errors() {
        assert!(
            BridgeError::UnknownFunction {
                kind: "x".to_string(),
                function: "build_x".to_string(),
            }
            .is_config_error()
        );
        assert!(!BridgeError::decode("truncated").is_config_error());
    }

    #[test]
    fn fatal_errors() {
        assert!(
            BridgeError::Trap {
                function: "parse_user".to_string(),
                cause: "unreachable".to_string(),
            }
            .is_fatal()
        );
        assert!(BridgeError::Poisoned.is_fatal());
        assert!(
            !BridgeError::CallFailed {
                function: "parse_user".to_string()
            }
            .is_fatal()
        );
    }
}
