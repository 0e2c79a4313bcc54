//! # Script Exchange
//!
//! Moves one script into a guest and one result string back out:
//!
//! 1. ask the guest allocator for room,
//! 2. copy the script (and terminator) into that region,
//! 3. call the evaluation export, optionally converting its value into a
//!    string offset through the handle export,
//! 4. copy the NUL-terminated result out and decode it.
//!
//! Every guest call may grow memory, so each memory access builds a new view.

use wasmtime::Trap;
use wasmtime::Val;
use wasmtime::WasmBacktrace;
use wasmtime_wasi::I32Exit;

use crate::config::DecodeMode;
use crate::config::EvalArgs;
use crate::config::EvalConfig;
use crate::error::Error;
use crate::error::Result;
use crate::instance::State;
use crate::memory::MemoryView;
use crate::runtime::InstanceId;

/// Where the script was written. Valid for one exchange only.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScriptBuffer {
    pub offset: u64,
    pub len: u64,
}

/// Offset of a result string in guest memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResultHandle {
    pub offset: u64,
}

/// An exchange failure, and whether the instance survives it.
struct Failure {
    error: Error,
    poison: bool,
}

impl Failure {
    fn fatal(error: Error) -> Self {
        Self { error, poison: true }
    }

    fn graceful(error: Error) -> Self {
        Self { error, poison: false }
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        let poison = matches!(
            error,
            Error::OutOfBoundsAccess { .. } | Error::UnterminatedResult { .. }
        );
        Self { error, poison }
    }
}

/// Describes an error that originated inside the guest: a trap, a
/// `proc_exit`, or a failure raised by a stub while guest code was running.
///
/// Returns `None` for engine errors unrelated to guest execution.
pub(crate) fn guest_failure(e: &wasmtime::Error) -> Option<String> {
    if let Some(exit) = e.downcast_ref::<I32Exit>() {
        return Some(format!("guest exited with status {}", exit.0));
    }
    if let Some(trap) = e.downcast_ref::<Trap>() {
        return Some(trap.to_string());
    }
    if e.downcast_ref::<WasmBacktrace>().is_some() {
        return Some(format!("{:#}", e));
    }
    None
}

fn describe(e: &wasmtime::Error) -> String {
    guest_failure(e).unwrap_or_else(|| format!("{:#}", e))
}

fn guest_offset(value: i32) -> u64 {
    value as u32 as u64
}

pub(crate) async fn evaluate(
    state: &mut State,
    config: &EvalConfig,
    id: InstanceId,
    script: &str,
) -> Result<String> {
    if state.poisoned {
        return Err(Error::InstancePoisoned(id));
    }

    match exchange(state, config, id, script).await {
        Ok(result) => {
            state.evaluations += 1;
            Ok(result)
        }
        Err(Failure { error, poison }) => {
            if poison {
                state.poisoned = true;
                tracing::warn!(instance = %id, %error, "instance poisoned");
            } else {
                tracing::debug!(instance = %id, %error, "evaluation failed");
            }
            Err(error)
        }
    }
}

async fn exchange(
    state: &mut State,
    config: &EvalConfig,
    id: InstanceId,
    script: &str,
) -> std::result::Result<String, Failure> {
    let buffer = write_script(state, config, script).await?;
    tracing::debug!(instance = %id, offset = buffer.offset, len = buffer.len, "script written");

    let handle = run_eval(state, config, buffer).await?;
    tracing::debug!(instance = %id, offset = handle.offset, "result ready");

    read_result(state, config, handle)
}

async fn write_script(
    state: &mut State,
    config: &EvalConfig,
    script: &str,
) -> std::result::Result<ScriptBuffer, Failure> {
    let bytes = script.as_bytes();
    let requested = bytes.len();
    let failed = || Error::AllocationFailed { requested };

    let len = i32::try_from(requested).map_err(|_| Failure::graceful(failed()))?;

    let ptr = state
        .exports
        .alloc
        .call_async(&mut state.store, len)
        .await
        .map_err(|e| {
            tracing::debug!(error = %describe(&e), "allocator trapped");
            Failure::fatal(failed())
        })?;
    if ptr <= 0 {
        return Err(Failure::graceful(failed()));
    }

    let mut staged = Vec::with_capacity(requested + 1);
    staged.extend_from_slice(bytes);
    if config.abi.nul_terminated {
        staged.push(0);
    }

    let offset = guest_offset(ptr);
    let memory = state.exports.memory;
    MemoryView::new(memory.data_mut(&mut state.store)).write(offset, &staged)?;

    Ok(ScriptBuffer {
        offset,
        len: requested as u64,
    })
}

async fn run_eval(
    state: &mut State,
    config: &EvalConfig,
    buffer: ScriptBuffer,
) -> std::result::Result<ResultHandle, Failure> {
    let trapped = |e: wasmtime::Error| Failure::fatal(Error::EvaluationTrap(describe(&e)));

    // Both values fit an i32: the allocator accepted the length and returned the offset.
    let params = match config.abi.args {
        EvalArgs::None => vec![],
        EvalArgs::Pointer => vec![Val::I32(buffer.offset as i32)],
        EvalArgs::PointerLength => vec![Val::I32(buffer.offset as i32), Val::I32(buffer.len as i32)],
    };

    let eval = state.exports.eval;
    let mut results: Vec<Val> = eval
        .ty(&state.store)
        .results()
        .map(|ty| Val::default_for_ty(&ty).unwrap_or(Val::I32(0)))
        .collect();
    eval.call_async(&mut state.store, &params, &mut results)
        .await
        .map_err(trapped)?;

    let value = results
        .first()
        .cloned()
        .ok_or_else(|| Failure::fatal(Error::EvaluationTrap("evaluation returned no value".into())))?;

    let offset = match state.exports.handle {
        None => value.i32(),
        Some(handle) => {
            let mut converted = [Val::I32(0)];
            handle
                .call_async(&mut state.store, &[value], &mut converted)
                .await
                .map_err(trapped)?;
            converted[0].i32()
        }
    }
    .ok_or_else(|| Failure::fatal(Error::EvaluationTrap("result offset is not an i32".into())))?;

    if offset == 0 {
        return Err(Failure::graceful(Error::EvaluationTrap(
            "guest returned a null result".into(),
        )));
    }

    Ok(ResultHandle {
        offset: guest_offset(offset),
    })
}

fn read_result(
    state: &mut State,
    config: &EvalConfig,
    handle: ResultHandle,
) -> std::result::Result<String, Failure> {
    let memory = state.exports.memory;
    let view = MemoryView::new(memory.data_mut(&mut state.store));
    let bytes = view.read_cstr(handle.offset, config.max_result_len as u64)?;

    match config.decode {
        DecodeMode::Strict => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| {
                Failure::graceful(Error::InvalidEncoding {
                    valid_up_to: e.valid_up_to(),
                })
            }),
        DecodeMode::Lossy => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}
