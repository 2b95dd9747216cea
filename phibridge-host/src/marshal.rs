//! Single request/response exchange with a codec export.
//!
//! One exchange is: acquire an input buffer, call the export, interpret its
//! return convention, copy the response out, release the output buffer (if
//! the host owns it) and release the input buffer. The module signals
//! failure only with a `0` pointer, or a `0` size under the sized
//! convention; no reason is ever available.

use crate::abi::{AbiConfig, OutputOwnership, ParamShape};
use crate::buffer::{BufferManager, BufferStats};
use crate::guest::{CallArgs, GuestModule, RawReturn};
use crate::memory::{GuestPtr, LinearMemory};
use phibridge_core::error::{BridgeError, Result};

/// Runs exchanges according to a fixed ABI.
#[derive(Debug)]
pub struct CallMarshaller {
    params: ParamShape,
    output: OutputOwnership,
    buffers: BufferManager,
}

impl CallMarshaller {
    /// Create a marshaller for an ABI.
    pub fn new(abi: &AbiConfig) -> Self {
        Self {
            params: abi.params,
            output: abi.output,
            buffers: BufferManager::new(),
        }
    }

    /// Get the buffer counters accumulated so far.
    pub fn buffer_stats(&self) -> BufferStats {
        self.buffers.stats()
    }

    /// Send `request` to `export` and return the raw response bytes.
    pub fn invoke<M: GuestModule>(
        &mut self,
        module: &mut M,
        function: &str,
        export: &M::Export,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let params = self.params;
        let output = self.output;
        let terminated = params == ParamShape::Ptr;

        self.buffers
            .with_acquired(module, request, terminated, |module, buffers, input| {
                let args = match params {
                    ParamShape::PtrLen => CallArgs::PtrLen {
                        ptr: input.offset,
                        len: request.len() as u32,
                    },
                    ParamShape::Ptr => CallArgs::Ptr(input.offset),
                };

                let raw = module.call(function, export, args)?;
                let (response, handle) = read_response(module, function, raw)?;

                if output == OutputOwnership::Caller {
                    let handle = buffers.adopt(handle);
                    let released = buffers.release(module, handle);
                    // A failed read still hands the buffer back before reporting.
                    let response = response?;
                    released?;
                    Ok(response)
                } else {
                    response
                }
            })
            .inspect(|response| {
                tracing::debug!(
                    function,
                    request_size = request.len(),
                    response_size = response.len(),
                    "Module call completed"
                );
            })
    }
}

/// Interpret a raw return and copy the response out of module memory.
///
/// Returns the copy result together with the output handle to free. The
/// outer error covers sentinel returns and outputs whose extent cannot be
/// determined; neither yields a handle that can be freed safely.
fn read_response<M: GuestModule>(
    module: &M,
    function: &str,
    raw: RawReturn,
) -> Result<(Result<Vec<u8>>, GuestPtr)> {
    let memory = LinearMemory::new(module.memory());
    match raw {
        RawReturn::SizePtr { size, ptr } => {
            if ptr == 0 || size == 0 {
                tracing::debug!(function, size, ptr, "Module call returned the sentinel");
                return Err(call_failed(function));
            }
            let handle = GuestPtr::new(ptr, size);
            Ok((memory.read_ptr(handle), handle))
        }
        RawReturn::Pointer(ptr) => {
            if ptr == 0 {
                tracing::debug!(function, "Module call returned the null pointer");
                return Err(call_failed(function));
            }
            let len = memory.terminated_len(ptr).inspect_err(|e| {
                tracing::warn!(function, ptr, error = %e, "Cannot size module output; buffer leaked");
            })?;
            let handle = GuestPtr::new(ptr, len + 1);
            let bytes = if len == 0 {
                Ok(Vec::new())
            } else {
                memory.read(ptr, len)
            };
            Ok((bytes, handle))
        }
    }
}

fn call_failed(function: &str) -> BridgeError {
    BridgeError::CallFailed {
        function: function.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::CallSignature;
    use crate::testing::{StubModule, StubReply};

    fn bind(module: &mut StubModule, abi: &AbiConfig, name: &str) -> crate::testing::StubExport {
        module
            .resolve_export(name, abi.signature())
            .unwrap()
            .expect("export missing")
    }

    #[test]
    fn sized_exchange_round_trip() {
        let abi = AbiConfig::packed();
        let mut module = StubModule::new().with_echo("parse_user");
        let export = bind(&mut module, &abi, "parse_user");
        let mut marshaller = CallMarshaller::new(&abi);

        let out = marshaller
            .invoke(&mut module, "parse_user", &export, b"\x00binary\xff")
            .unwrap();
        assert_eq!(out, b"\x00binary\xff");
        assert!(marshaller.buffer_stats().is_balanced());
        assert_eq!(module.live_allocations(), 0);
        assert!(module.violations().is_empty());
    }

    #[test]
    fn zero_pointer_is_call_failed() {
        let abi = AbiConfig::packed();
        let mut module = StubModule::new().with_reply("parse_user", StubReply::Fail);
        let export = bind(&mut module, &abi, "parse_user");
        let mut marshaller = CallMarshaller::new(&abi);

        let err = marshaller
            .invoke(&mut module, "parse_user", &export, b"abc")
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::CallFailed {
                function: "parse_user".to_string()
            }
        );
        assert!(marshaller.buffer_stats().is_balanced());
        assert_eq!(module.live_allocations(), 0);
    }

    #[test]
    fn zero_size_is_call_failed() {
        let abi = AbiConfig::packed();
        let mut module = StubModule::new().with_reply("build_user", StubReply::ZeroSize);
        let export = bind(&mut module, &abi, "build_user");
        let mut marshaller = CallMarshaller::new(&abi);

        let err = marshaller
            .invoke(&mut module, "build_user", &export, b"abc")
            .unwrap_err();
        assert_eq!(err.code(), "B002");
        assert_eq!(module.live_allocations(), 0);
    }

    #[test]
    fn cstring_exchange_frees_with_terminator() {
        let abi = AbiConfig::json_cstring();
        let mut module = StubModule::new().with_echo("parse_user");
        let export = bind(&mut module, &abi, "parse_user");
        let mut marshaller = CallMarshaller::new(&abi);

        let out = marshaller
            .invoke(&mut module, "parse_user", &export, br#"{"id":1}"#)
            .unwrap();
        assert_eq!(out, br#"{"id":1}"#);
        assert_eq!(module.last_input(), Some(br#"{"id":1}"#.as_slice()));
        assert!(module.violations().is_empty());
        assert_eq!(module.live_allocations(), 0);
    }

    #[test]
    fn module_owned_output_is_not_freed() {
        let abi = AbiConfig::legacy_cstring();
        let mut module = StubModule::new().with_echo("parse_user");
        let export = bind(&mut module, &abi, "parse_user");
        let mut marshaller = CallMarshaller::new(&abi);

        marshaller
            .invoke(&mut module, "parse_user", &export, b"{}")
            .unwrap();
        assert!(marshaller.buffer_stats().is_balanced());
        // The output stays live inside the module.
        assert_eq!(module.live_allocations(), 1);
    }

    #[test]
    fn signature_is_fixed_at_bind_time() {
        let mut module = StubModule::new().with_echo("parse_user");
        let signature = CallSignature {
            params: ParamShape::Ptr,
            returns: crate::abi::ReturnShape::NullTerminated,
        };
        let export = module.resolve_export("parse_user", signature).unwrap();
        assert_eq!(export.map(|e| e.signature), Some(signature));
    }
}
