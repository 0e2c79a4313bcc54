//! # Guest Instance Handle
//!
//! A thread-safe handle to a running guest. Wraps the Store and the resolved
//! exports in a tokio mutex so that `evaluate` can be awaited from many tasks
//! while the exchanges themselves run one at a time.

use std::sync::Arc;

use tokio::sync::Mutex;
use wasmtime::Func;
use wasmtime::Instance;
use wasmtime::Memory;
use wasmtime::Store;
use wasmtime::TypedFunc;

use crate::config::EvalConfig;
use crate::config::ResultAbi;
use crate::context::HostCtx;
use crate::error::Error;
use crate::error::Result;
use crate::module::GuestModule;
use crate::runtime::InstanceId;

/// The exports the exchange channel calls, looked up once after instantiation.
#[derive(Clone)]
pub(crate) struct Exports {
    pub memory: Memory,
    pub alloc: TypedFunc<i32, i32>,
    pub eval: Func,
    pub handle: Option<Func>,
}

impl Exports {
    pub(crate) fn resolve(
        store: &mut Store<HostCtx>,
        instance: &Instance,
        config: &EvalConfig,
    ) -> Result<Self> {
        let memory = instance
            .get_memory(&mut *store, &config.memory_export)
            .ok_or_else(|| Error::MissingExport(config.memory_export.clone()))?;

        let alloc = instance
            .get_typed_func::<i32, i32>(&mut *store, &config.abi.alloc)
            .map_err(|e| Error::AbiMismatch {
                export: config.abi.alloc.clone(),
                details: e.to_string(),
            })?;

        let eval = instance
            .get_func(&mut *store, &config.abi.eval)
            .ok_or_else(|| Error::MissingExport(config.abi.eval.clone()))?;

        let handle = match &config.abi.result {
            ResultAbi::Offset => None,
            ResultAbi::Handle { export } => Some(
                instance
                    .get_func(&mut *store, export)
                    .ok_or_else(|| Error::MissingExport(export.clone()))?,
            ),
        };

        Ok(Self {
            memory,
            alloc,
            eval,
            handle,
        })
    }
}

pub(crate) struct State {
    pub store: Store<HostCtx>,
    pub exports: Exports,
    /// Set once the guest trapped or broke the exchange contract.
    pub poisoned: bool,
    pub evaluations: u64,
}

/// Handle to one guest instance. Clones share the instance.
#[derive(Clone)]
pub struct GuestInstance {
    id: InstanceId,
    module: Arc<GuestModule>,
    config: Arc<EvalConfig>,
    pub(crate) inner: Arc<Mutex<State>>,
}

impl GuestInstance {
    pub(crate) fn new(
        id: InstanceId,
        module: Arc<GuestModule>,
        config: EvalConfig,
        store: Store<HostCtx>,
        exports: Exports,
    ) -> Self {
        Self {
            id,
            module,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(State {
                store,
                exports,
                poisoned: false,
                evaluations: 0,
            })),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn module(&self) -> &Arc<GuestModule> {
        &self.module
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluates `script` in the guest and returns its result string.
    ///
    /// Waits for any exchange already running on this instance.
    pub async fn evaluate(&self, script: &str) -> Result<String> {
        let mut guard = self.inner.lock().await;
        crate::exchange::evaluate(&mut guard, &self.config, self.id, script).await
    }

    pub async fn is_poisoned(&self) -> bool {
        self.inner.lock().await.poisoned
    }

    /// Number of `evaluate` calls that returned a result.
    pub async fn evaluations(&self) -> u64 {
        self.inner.lock().await.evaluations
    }

    /// Runs `f` with exclusive access to the host context, e.g. to update
    /// data that custom stubs read between evaluations.
    pub async fn with_context<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut HostCtx) -> R,
    {
        let mut guard = self.inner.lock().await;
        f(guard.store.data_mut())
    }

    /// Current size of the guest's linear memory in bytes.
    pub async fn memory_size(&self) -> u64 {
        let guard = self.inner.lock().await;
        guard.exports.memory.data_size(&guard.store) as u64
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
