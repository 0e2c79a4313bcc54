//! # Import stubs implemented natively
//!
//! A guest built against a libc expects a handful of WASI preview1 functions
//! even though the sandbox offers it no files, no environment and no process.
//! The stub table maps each `(module, name)` import to a behavior that keeps
//! the guest satisfied without ever touching a host resource.
//!
//! Only imports the module actually declares get linked.

pub mod clock;
pub mod wasi;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use wasmtime::Caller;
use wasmtime::ExternType;
use wasmtime::Linker;
use wasmtime::Module;
use wasmtime::Val;
use wasmtime::ValType;

pub use clock::ClockSource;
pub use clock::FixedClock;
pub use clock::MonotonicClock;

use crate::context::HostCtx;
use crate::error::Error;
use crate::error::Result;
use crate::module::Signature;
use crate::module::WasmType::I32;
use crate::module::WasmType::I64;

/// Module name under which the WASI preview1 stubs are bound.
pub const WASI_PREVIEW1: &str = "wasi_snapshot_preview1";

/// A host function supplied by the embedding application.
///
/// Receives the raw parameter values and must fill `results`, which arrive
/// pre-populated with zero values of the declared result types.
pub type HostFn =
    Arc<dyn Fn(&mut Caller<'_, HostCtx>, &[Val], &mut [Val]) -> wasmtime::Result<()> + Send + Sync>;

/// What a stubbed import does when the guest calls it.
#[derive(Clone)]
pub enum StubBehavior {
    /// Writes the clock source's current time (u64 nanoseconds) at the
    /// time pointer and returns success. A time pointer that does not fit
    /// inside guest memory is not written and returns `EFAULT` (21) instead.
    ClockTimeGet,
    /// Reports every iovec byte as written. Text sent to fds 1 and 2 is
    /// forwarded to the host log, nothing is emitted anywhere else.
    FdWrite,
    FdClose,
    /// Reports a new offset of 0.
    FdSeek,
    /// An empty environment.
    EnvironGet,
    EnvironSizesGet,
    /// An empty argument vector.
    ArgsGet,
    ArgsSizesGet,
    /// Terminates the current call with a trap, whatever the exit code.
    ProcExit,
    /// Describes fds 0..=2 as character devices; anything else is `EBADF`.
    FdFdstatGet,
    /// There are no preopened directories.
    FdPrestatGet,
    FdPrestatDirName,
    /// Ignores its arguments and returns the given status. Fits any signature:
    /// the status is converted to the first result type, other results are zero.
    Status(i32),
    Custom(HostFn),
}

impl StubBehavior {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&mut Caller<'_, HostCtx>, &[Val], &mut [Val]) -> wasmtime::Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// The import signature this behavior requires, or `None` when it
    /// adapts to whatever the module declares.
    pub fn signature(&self) -> Option<Signature> {
        let sig = match self {
            Self::ClockTimeGet => Signature::new(&[I32, I64, I32], &[I32]),
            Self::FdWrite => Signature::new(&[I32, I32, I32, I32], &[I32]),
            Self::FdClose => Signature::new(&[I32], &[I32]),
            Self::FdSeek => Signature::new(&[I32, I64, I32, I32], &[I32]),
            Self::EnvironGet
            | Self::EnvironSizesGet
            | Self::ArgsGet
            | Self::ArgsSizesGet
            | Self::FdFdstatGet
            | Self::FdPrestatGet => Signature::new(&[I32, I32], &[I32]),
            Self::ProcExit => Signature::new(&[I32], &[]),
            Self::FdPrestatDirName => Signature::new(&[I32, I32, I32], &[I32]),
            Self::Status(_) | Self::Custom(_) => return None,
        };
        Some(sig)
    }

    fn invoke(
        &self,
        caller: &mut Caller<'_, HostCtx>,
        params: &[Val],
        results: &mut [Val],
    ) -> wasmtime::Result<()> {
        let errno = match self {
            Self::ClockTimeGet => {
                wasi::clock_time_get(caller, arg_i32(params, 0)?, arg_i64(params, 1)?, arg_i32(params, 2)?)
            }
            Self::FdWrite => wasi::fd_write(
                caller,
                arg_i32(params, 0)?,
                arg_i32(params, 1)?,
                arg_i32(params, 2)?,
                arg_i32(params, 3)?,
            ),
            Self::FdClose => wasi::ERRNO_SUCCESS,
            Self::FdSeek => wasi::fd_seek(caller, arg_i32(params, 3)?),
            Self::EnvironGet | Self::ArgsGet => wasi::ERRNO_SUCCESS,
            Self::EnvironSizesGet | Self::ArgsSizesGet => {
                wasi::sizes_get(caller, arg_i32(params, 0)?, arg_i32(params, 1)?)
            }
            Self::ProcExit => return Err(wasi::proc_exit(arg_i32(params, 0)?)),
            Self::FdFdstatGet => wasi::fd_fdstat_get(caller, arg_i32(params, 0)?, arg_i32(params, 1)?),
            Self::FdPrestatGet | Self::FdPrestatDirName => wasi::ERRNO_BADF,
            Self::Status(status) => *status,
            Self::Custom(f) => return f(caller, params, results),
        };

        if let Some(slot) = results.first_mut() {
            let status = match *slot {
                Val::I32(_) => Val::I32(errno),
                Val::I64(_) => Val::I64(errno as i64),
                Val::F32(_) => Val::F32((errno as f32).to_bits()),
                Val::F64(_) => Val::F64((errno as f64).to_bits()),
                _ => return Ok(()),
            };
            *slot = status;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StubBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClockTimeGet => f.write_str("ClockTimeGet"),
            Self::FdWrite => f.write_str("FdWrite"),
            Self::FdClose => f.write_str("FdClose"),
            Self::FdSeek => f.write_str("FdSeek"),
            Self::EnvironGet => f.write_str("EnvironGet"),
            Self::EnvironSizesGet => f.write_str("EnvironSizesGet"),
            Self::ArgsGet => f.write_str("ArgsGet"),
            Self::ArgsSizesGet => f.write_str("ArgsSizesGet"),
            Self::ProcExit => f.write_str("ProcExit"),
            Self::FdFdstatGet => f.write_str("FdFdstatGet"),
            Self::FdPrestatGet => f.write_str("FdPrestatGet"),
            Self::FdPrestatDirName => f.write_str("FdPrestatDirName"),
            Self::Status(status) => f.debug_tuple("Status").field(status).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn arg_i32(params: &[Val], index: usize) -> wasmtime::Result<i32> {
    params
        .get(index)
        .and_then(Val::i32)
        .ok_or_else(|| wasmtime::Error::msg(format!("stub expected an i32 at parameter {}", index)))
}

fn arg_i64(params: &[Val], index: usize) -> wasmtime::Result<i64> {
    params
        .get(index)
        .and_then(Val::i64)
        .ok_or_else(|| wasmtime::Error::msg(format!("stub expected an i64 at parameter {}", index)))
}

/// The mapping from `(module, name)` to stub behavior, plus the clock the
/// time stub reads from.
///
/// Immutable once handed to the loader; cloning is cheap enough to share one
/// table between many instances.
#[derive(Clone)]
pub struct StubTable {
    stubs: HashMap<(String, String), StubBehavior>,
    clock: Arc<dyn ClockSource>,
}

impl StubTable {
    /// An empty table using the monotonic wall clock.
    pub fn new() -> Self {
        Self {
            stubs: HashMap::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Every built-in behavior bound under `wasi_snapshot_preview1`.
    pub fn wasi_preview1() -> Self {
        [
            ("clock_time_get", StubBehavior::ClockTimeGet),
            ("fd_write", StubBehavior::FdWrite),
            ("fd_close", StubBehavior::FdClose),
            ("fd_seek", StubBehavior::FdSeek),
            ("environ_get", StubBehavior::EnvironGet),
            ("environ_sizes_get", StubBehavior::EnvironSizesGet),
            ("args_get", StubBehavior::ArgsGet),
            ("args_sizes_get", StubBehavior::ArgsSizesGet),
            ("proc_exit", StubBehavior::ProcExit),
            ("fd_fdstat_get", StubBehavior::FdFdstatGet),
            ("fd_prestat_get", StubBehavior::FdPrestatGet),
            ("fd_prestat_dir_name", StubBehavior::FdPrestatDirName),
        ]
        .into_iter()
        .fold(Self::new(), |table, (name, behavior)| {
            table.bind(WASI_PREVIEW1, name, behavior)
        })
    }

    /// Binds (or rebinds) one import.
    pub fn bind(
        mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        behavior: StubBehavior,
    ) -> Self {
        self.stubs.insert((module.into(), name.into()), behavior);
        self
    }

    pub fn with_clock(mut self, clock: impl ClockSource) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&StubBehavior> {
        self.stubs.get(&(module.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub(crate) fn clock(&self) -> Arc<dyn ClockSource> {
        Arc::clone(&self.clock)
    }

    /// Defines a host function for every function import of `module`.
    ///
    /// Expects the module's ledger to have been checked against this table.
    pub(crate) fn link(&self, linker: &mut Linker<HostCtx>, module: &Module) -> Result<()> {
        let mut linked = HashSet::new();

        for import in module.imports() {
            let ExternType::Func(func_ty) = import.ty() else {
                continue;
            };
            let key = (import.module().to_string(), import.name().to_string());
            if !linked.insert(key.clone()) {
                continue;
            }

            let behavior = self
                .stubs
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::MissingImport(format!("{}::{}", key.0, key.1)))?;
            let result_types: Vec<ValType> = func_ty.results().collect();

            tracing::trace!(module = %key.0, name = %key.1, ?behavior, "linking import stub");

            linker
                .func_new(
                    &key.0,
                    &key.1,
                    func_ty.clone(),
                    move |mut caller: Caller<'_, HostCtx>, params: &[Val], results: &mut [Val]| {
                        for (slot, ty) in results.iter_mut().zip(&result_types) {
                            *slot = Val::default_for_ty(ty).unwrap_or(Val::I32(0));
                        }
                        behavior.invoke(&mut caller, params, results)
                    },
                )
                .map_err(Error::Engine)?;
        }
        Ok(())
    }
}

impl Default for StubTable {
    fn default() -> Self {
        Self::wasi_preview1()
    }
}

impl std::fmt::Debug for StubTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubTable")
            .field("stubs", &self.stubs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wasi_preview1_binds_every_builtin() {
        let table = StubTable::wasi_preview1();
        assert_eq!(table.len(), 12);
        for name in ["clock_time_get", "fd_write", "proc_exit", "fd_prestat_dir_name"] {
            assert!(table.get(WASI_PREVIEW1, name).is_some(), "{} should be bound", name);
        }
        assert!(table.get("env", "fd_write").is_none());
    }

    #[test]
    fn test_bind_replaces_existing_behavior() {
        let table = StubTable::wasi_preview1().bind(WASI_PREVIEW1, "fd_close", StubBehavior::Status(8));
        assert!(matches!(
            table.get(WASI_PREVIEW1, "fd_close"),
            Some(StubBehavior::Status(8))
        ));
    }

    #[test]
    fn test_builtin_signatures() {
        assert_eq!(
            StubBehavior::ClockTimeGet.signature().map(|s| s.to_string()),
            Some("(i32, i64, i32) -> (i32)".to_string())
        );
        assert_eq!(
            StubBehavior::ProcExit.signature().map(|s| s.to_string()),
            Some("(i32) -> ()".to_string())
        );
        assert!(StubBehavior::Status(0).signature().is_none());
        assert!(StubBehavior::custom(|_, _, _| Ok(())).signature().is_none());
    }
}
