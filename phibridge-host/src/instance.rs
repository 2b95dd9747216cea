//! Wasmtime-backed module instance.
//!
//! [`WasmGuest`] instantiates a compiled codec module in its own store and
//! exposes it through [`GuestModule`]. Codec exports are bound with typed
//! function handles, so a module whose export types disagree with the
//! configured ABI is rejected when the export is first resolved rather than
//! at call time.

use crate::abi::{AbiConfig, CallSignature, FreeShape, ParamShape, ReturnShape};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::guest::{CallArgs, GuestModule, RawReturn};
use crate::runtime::{CompiledModule, WasmRuntime};
use phibridge_core::error::{BridgeError, Result};
use std::path::Path;
use wasmtime::{Instance, Linker, Memory, Store, StoreLimits, StoreLimitsBuilder, TypedFunc};

/// Per-store host data.
pub struct HostState {
    limits: StoreLimits,
}

/// A codec export bound with a concrete signature.
#[derive(Clone)]
pub enum WasmExport {
    /// `(ptr, len) -> (size, ptr)`
    Sized(TypedFunc<(u32, u32), (u32, u32)>),
    /// `(ptr, len) -> ptr`
    SizedToString(TypedFunc<(u32, u32), u32>),
    /// `(ptr) -> (size, ptr)`
    StringToSized(TypedFunc<u32, (u32, u32)>),
    /// `(ptr) -> ptr`
    String(TypedFunc<u32, u32>),
}

enum FreeFn {
    Sized(TypedFunc<(u32, u32), ()>),
    Unsized(TypedFunc<u32, ()>),
}

/// A live codec module instance.
pub struct WasmGuest {
    name: String,
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    malloc: TypedFunc<u32, u32>,
    malloc_name: String,
    free: FreeFn,
    free_name: String,
    fuel: Option<u64>,
}

impl WasmGuest {
    /// Instantiate a compiled module and bind its allocator exports.
    pub fn instantiate(
        runtime: &WasmRuntime,
        module: &CompiledModule,
        abi: &AbiConfig,
    ) -> Result<Self> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(runtime.config().max_memory_bytes())
            .build();
        let mut store = Store::new(runtime.engine(), HostState { limits });
        store.limiter(|state| &mut state.limits);

        let fuel = runtime.fuel_per_call();
        if let Some(fuel) = fuel {
            store.set_fuel(fuel).map_err(|e| BridgeError::WasmLoad {
                module: module.name().to_string(),
                cause: format!("Failed to set fuel: {}", e),
            })?;
        }

        let linker: Linker<HostState> = Linker::new(runtime.engine());
        let instance = linker
            .instantiate(&mut store, module.module())
            .map_err(|e| BridgeError::WasmLoad {
                module: module.name().to_string(),
                cause: format!("Failed to instantiate module: {}", e),
            })?;

        let memory =
            instance
                .get_memory(&mut store, "memory")
                .ok_or_else(|| BridgeError::MissingExport {
                    export: "memory".to_string(),
                    cause: "module does not export a memory".to_string(),
                })?;

        let malloc = instance
            .get_typed_func::<u32, u32>(&mut store, &abi.malloc_export)
            .map_err(|e| missing(&abi.malloc_export, e))?;

        let free = match abi.free {
            FreeShape::Sized => instance
                .get_typed_func::<(u32, u32), ()>(&mut store, &abi.free_export)
                .map(FreeFn::Sized),
            FreeShape::Unsized => instance
                .get_typed_func::<u32, ()>(&mut store, &abi.free_export)
                .map(FreeFn::Unsized),
        }
        .map_err(|e| missing(&abi.free_export, e))?;

        tracing::debug!(
            module = module.name(),
            content_hash = module.content_hash(),
            memory_bytes = memory.data_size(&store),
            fuel = ?fuel,
            "Instantiated codec module"
        );

        Ok(Self {
            name: module.name().to_string(),
            store,
            instance,
            memory,
            malloc,
            malloc_name: abi.malloc_export.clone(),
            free,
            free_name: abi.free_export.clone(),
            fuel,
        })
    }

    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fuel left in the store, if fuel is enabled.
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.fuel.and_then(|_| self.store.get_fuel().ok())
    }

    /// Read an exported `i32` global, e.g. a counter a test module keeps.
    pub fn global_i32(&mut self, name: &str) -> Option<i32> {
        self.instance
            .get_global(&mut self.store, name)
            .and_then(|global| global.get(&mut self.store).i32())
    }

    fn refuel(&mut self) -> wasmtime::Result<()> {
        match self.fuel {
            Some(fuel) => self.store.set_fuel(fuel),
            None => Ok(()),
        }
    }
}

impl GuestModule for WasmGuest {
    type Export = WasmExport;

    fn resolve_export(
        &mut self,
        name: &str,
        signature: CallSignature,
    ) -> Result<Option<WasmExport>> {
        if self.instance.get_export(&mut self.store, name).is_none() {
            return Ok(None);
        }
        let store = &mut self.store;
        let export = match (signature.params, signature.returns) {
            (ParamShape::PtrLen, ReturnShape::SizePtr) => self
                .instance
                .get_typed_func(store, name)
                .map(WasmExport::Sized),
            (ParamShape::PtrLen, ReturnShape::NullTerminated) => self
                .instance
                .get_typed_func(store, name)
                .map(WasmExport::SizedToString),
            (ParamShape::Ptr, ReturnShape::SizePtr) => self
                .instance
                .get_typed_func(store, name)
                .map(WasmExport::StringToSized),
            (ParamShape::Ptr, ReturnShape::NullTerminated) => self
                .instance
                .get_typed_func(store, name)
                .map(WasmExport::String),
        }
        .map_err(|e| missing(name, e))?;
        Ok(Some(export))
    }

    fn malloc(&mut self, size: u32) -> Result<u32> {
        self.refuel()
            .and_then(|()| self.malloc.call(&mut self.store, size))
            .map_err(|e| trap(&self.malloc_name, e))
    }

    fn free(&mut self, ptr: u32, size: u32) -> Result<()> {
        self.refuel()
            .and_then(|()| match &self.free {
                FreeFn::Sized(free) => free.call(&mut self.store, (ptr, size)),
                FreeFn::Unsized(free) => free.call(&mut self.store, ptr),
            })
            .map_err(|e| trap(&self.free_name, e))
    }

    fn call(&mut self, function: &str, export: &WasmExport, args: CallArgs) -> Result<RawReturn> {
        self.refuel().map_err(|e| trap(function, e))?;
        let store = &mut self.store;
        let result = match (export, args) {
            (WasmExport::Sized(f), CallArgs::PtrLen { ptr, len }) => f
                .call(store, (ptr, len))
                .map(|(size, ptr)| RawReturn::SizePtr { size, ptr }),
            (WasmExport::SizedToString(f), CallArgs::PtrLen { ptr, len }) => {
                f.call(store, (ptr, len)).map(RawReturn::Pointer)
            }
            (WasmExport::StringToSized(f), CallArgs::Ptr(ptr)) => f
                .call(store, ptr)
                .map(|(size, ptr)| RawReturn::SizePtr { size, ptr }),
            (WasmExport::String(f), CallArgs::Ptr(ptr)) => f.call(store, ptr).map(RawReturn::Pointer),
            _ => {
                return Err(BridgeError::InvalidAbi {
                    cause: format!("'{}' was bound with a different parameter shape", function),
                });
            }
        };
        result.map_err(|e| trap(function, e))
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }
}

impl Bridge<WasmGuest> {
    /// Compile, instantiate and bind a codec module.
    pub fn from_wasm(
        runtime: &WasmRuntime,
        name: &str,
        wasm_bytes: &[u8],
        config: &BridgeConfig,
    ) -> Result<Self> {
        let module = runtime.compile(name, wasm_bytes)?;
        Self::from_compiled(runtime, &module, config)
    }

    /// Load a codec module from a `.wasm` file.
    pub fn from_file(runtime: &WasmRuntime, path: &Path, config: &BridgeConfig) -> Result<Self> {
        let module = runtime.compile_file(path)?;
        Self::from_compiled(runtime, &module, config)
    }

    /// Instantiate an already compiled module.
    pub fn from_compiled(
        runtime: &WasmRuntime,
        module: &CompiledModule,
        config: &BridgeConfig,
    ) -> Result<Self> {
        config.abi.validate()?;
        let guest = WasmGuest::instantiate(runtime, module, &config.abi)?;
        let mut bridge = Self::new(guest, config.abi.clone())?;
        bridge.preload(&config.preload)?;
        Ok(bridge)
    }
}

fn missing(export: &str, e: wasmtime::Error) -> BridgeError {
    BridgeError::MissingExport {
        export: export.to_string(),
        cause: e.to_string(),
    }
}

fn trap(function: &str, e: wasmtime::Error) -> BridgeError {
    BridgeError::Trap {
        function: function.to_string(),
        cause: format!("{:#}", e),
    }
}
