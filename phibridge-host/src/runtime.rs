//! Wasmtime engine setup and compiled-module cache.
//!
//! One [`WasmRuntime`] can back many bridges. Compiling the same codec
//! binary twice returns the cached module, keyed by a hash of its bytes,
//! unless caching is switched off in the [`RuntimeConfig`].

use dashmap::DashMap;
use phibridge_core::error::{BridgeError, Result};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use wasmtime::{Config, Engine, Module, Strategy};

/// Size of one linear memory page.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Runtime limits and engine options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Largest linear memory an instance may grow to, in pages.
    pub max_memory_pages: u32,
    /// Meter execution with fuel.
    pub fuel_enabled: bool,
    /// Fuel granted before every call into the module.
    pub fuel_amount: u64,
    /// Reuse compiled modules with identical bytes.
    pub cache_modules: bool,
    /// Keep DWARF info so traps carry source locations.
    pub debug_info: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 1024,
            fuel_enabled: false,
            fuel_amount: 10_000_000,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl RuntimeConfig {
    /// Tight limits for tests: 16 MiB of memory, fuel on, no cache.
    pub fn testing() -> Self {
        Self {
            max_memory_pages: 256,
            fuel_enabled: true,
            fuel_amount: 1_000_000,
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Set the memory ceiling in pages.
    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    /// Switch fuel metering and set the per-call amount.
    pub fn with_fuel(mut self, enabled: bool, amount: u64) -> Self {
        self.fuel_enabled = enabled;
        self.fuel_amount = amount;
        self
    }

    /// Switch the compiled-module cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    /// Memory ceiling in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_pages as usize * WASM_PAGE_SIZE
    }

    fn engine_config(&self) -> Config {
        let mut config = Config::new();
        // Sized exports return (size, ptr).
        config.wasm_multi_value(true);
        config.consume_fuel(self.fuel_enabled);
        config.debug_info(self.debug_info);
        config.strategy(Strategy::Cranelift);
        config
    }
}

/// A compiled codec module.
pub struct CompiledModule {
    name: String,
    module: Module,
    content_hash: u64,
}

impl CompiledModule {
    /// Name used in diagnostics, usually the file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Hash of the binary this module was compiled from.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Names of all exports the module declares.
    pub fn export_names(&self) -> Vec<String> {
        self.module
            .exports()
            .map(|export| export.name().to_string())
            .collect()
    }
}

/// Shared engine plus compiled-module cache.
pub struct WasmRuntime {
    engine: Engine,
    config: RuntimeConfig,
    modules: DashMap<u64, Arc<CompiledModule>>,
}

impl WasmRuntime {
    /// Build an engine for `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.engine_config()).map_err(|e| BridgeError::WasmLoad {
            module: "engine".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            engine,
            config,
            modules: DashMap::new(),
        })
    }

    /// Build an engine with [`RuntimeConfig::default`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(RuntimeConfig::default())
    }

    /// The Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile a module binary, reusing a cached compilation of the same bytes.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let content_hash = content_hash(wasm_bytes);
        if self.config.cache_modules {
            if let Some(cached) = self.modules.get(&content_hash) {
                tracing::debug!(module = name, content_hash, "Reusing compiled module");
                return Ok(Arc::clone(cached.value()));
            }
        }

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| BridgeError::WasmLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        tracing::debug!(module = name, content_hash, bytes = wasm_bytes.len(), "Compiled module");

        let compiled = Arc::new(CompiledModule {
            name: name.to_string(),
            module,
            content_hash,
        });
        if self.config.cache_modules {
            self.modules.insert(content_hash, Arc::clone(&compiled));
        }
        Ok(compiled)
    }

    /// Read and compile a `.wasm` file.
    pub fn compile_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        let wasm_bytes = std::fs::read(path).map_err(|e| BridgeError::WasmLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        self.compile(name, &wasm_bytes)
    }

    /// Drop every cached module.
    pub fn clear_cache(&self) {
        self.modules.clear();
    }

    /// Number of cached modules.
    pub fn cache_size(&self) -> usize {
        self.modules.len()
    }

    /// Fuel to grant before each call, if metering is on.
    pub fn fuel_per_call(&self) -> Option<u64> {
        self.config.fuel_enabled.then_some(self.config.fuel_amount)
    }
}

fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RuntimeConfig::default();
        assert!(!config.fuel_enabled);
        assert!(config.cache_modules);
        assert_eq!(config.max_memory_bytes(), 64 * 1024 * 1024);
    }

    #[test]
    fn testing_config() {
        let config = RuntimeConfig::testing();
        assert!(config.fuel_enabled);
        assert!(config.debug_info);
        assert!(!config.cache_modules);
        assert!(RuntimeConfig::default().with_cache(false) != RuntimeConfig::default());
    }

    #[test]
    fn fresh_runtime_has_empty_cache() {
        let runtime = WasmRuntime::with_defaults().expect("Failed to create runtime");
        assert_eq!(runtime.cache_size(), 0);
        assert_eq!(runtime.fuel_per_call(), None);
    }

    #[test]
    fn content_hash_tracks_bytes() {
        let data = b"codec module bytes";
        assert_eq!(content_hash(data), content_hash(data));
        assert_ne!(content_hash(data), content_hash(b"other bytes"));
    }
}
