//! Lazy binding of codec exports.
//!
//! Each record kind maps to two exports: `parse_<kind>` (decode) and
//! `build_<kind>` (encode). The registry looks an export up the first time
//! its `(kind, direction)` pair is requested and serves every later request
//! from its cache. The export table never changes after instantiation, so
//! cached entries are never invalidated.

use crate::abi::CallSignature;
use crate::guest::GuestModule;
use phibridge_core::error::{BridgeError, Result};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

/// Direction of a codec call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Module bytes to structured record (`parse_<kind>`).
    Decode,
    /// Structured record to module bytes (`build_<kind>`).
    Encode,
}

impl Direction {
    /// Export name prefix for this direction.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Decode => "parse_",
            Self::Encode => "build_",
        }
    }

    /// Export name for a record kind.
    pub fn export_name(self, kind: &str) -> String {
        format!("{}{}", self.prefix(), kind)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => write!(f, "decode"),
            Self::Encode => write!(f, "encode"),
        }
    }
}

/// A bound export together with its name.
#[derive(Debug, Clone)]
pub struct ResolvedFunction<E> {
    /// Export name (e.g., `parse_user`).
    pub name: String,
    /// Bound callable.
    pub export: E,
}

/// Cache of bound codec exports, keyed by `(kind, direction)`.
#[derive(Debug)]
pub struct FunctionRegistry<E> {
    signature: CallSignature,
    cache: HashMap<(String, Direction), ResolvedFunction<E>>,
}

impl<E: Clone> FunctionRegistry<E> {
    /// Create an empty registry binding exports with `signature`.
    pub fn new(signature: CallSignature) -> Self {
        Self {
            signature,
            cache: HashMap::new(),
        }
    }

    /// Resolve the export for `(kind, direction)`, binding it on first use.
    ///
    /// A missing export is [`BridgeError::UnknownFunction`]; nothing is
    /// cached for it and no module memory is touched.
    pub fn resolve<M>(
        &mut self,
        module: &mut M,
        kind: &str,
        direction: Direction,
    ) -> Result<&ResolvedFunction<E>>
    where
        M: GuestModule<Export = E>,
    {
        match self.cache.entry((kind.to_string(), direction)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let name = direction.export_name(kind);
                let unknown = || BridgeError::UnknownFunction {
                    kind: kind.to_string(),
                    function: direction.export_name(kind),
                };
                if !is_valid_kind(kind) {
                    return Err(unknown());
                }
                let export = module
                    .resolve_export(&name, self.signature)?
                    .ok_or_else(unknown)?;
                tracing::debug!(kind, %direction, export = %name, "Bound module export");
                Ok(entry.insert(ResolvedFunction { name, export }))
            }
        }
    }

    /// Check if `(kind, direction)` has already been bound.
    pub fn is_resolved(&self, kind: &str, direction: Direction) -> bool {
        self.cache.contains_key(&(kind.to_string(), direction))
    }

    /// Number of bound exports.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if nothing has been bound yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Record kinds are identifier fragments appended to `parse_` / `build_`.
fn is_valid_kind(kind: &str) -> bool {
    !kind.is_empty() && kind.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
