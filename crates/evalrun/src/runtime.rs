//! # Runtime Registry
//!
//! Central registry for the guest lifecycle. Manages compiled guest modules
//! and the live instances built from them.
//!
//! Uses DashMap for concurrent access without global locking, so many tasks
//! can register modules and spin up instances at the same time.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use wasmtime::Engine;

use crate::builder::InstanceBuilder;
use crate::error::Error;
use crate::error::Result;
use crate::host::StubTable;
use crate::instance::GuestInstance;
use crate::module::GuestModule;
use crate::source::ModuleSource;

/// Strong type for module identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct ModuleId(pub u64);

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module-{}", self.0)
    }
}

/// Strong type for instance identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct InstanceId(pub u64);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// The central runtime for loading guest modules and evaluating scripts in them.
pub struct Runtime {
    pub(crate) engine: Engine,
    pub(crate) modules: DashMap<ModuleId, Arc<GuestModule>>,
    pub(crate) instances: DashMap<InstanceId, GuestInstance>,
    next_module_id: AtomicU64,
    next_instance_id: AtomicU64,
}

impl Runtime {
    /// Creates a new runtime with default engine configuration.
    pub fn new() -> Result<Self> {
        let mut config = wasmtime::Config::new();
        config.async_support(true);

        let engine = Engine::new(&config).map_err(Error::Engine)?;
        Ok(Self::with_engine(engine))
    }

    /// Creates a new runtime around an existing engine.
    ///
    /// The engine must have async support enabled.
    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine,
            modules: DashMap::new(),
            instances: DashMap::new(),
            next_module_id: AtomicU64::new(1),
            next_instance_id: AtomicU64::new(1),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Validates and compiles guest bytes, returning the new module's ID.
    pub fn register_module(&self, bytes: &[u8]) -> Result<ModuleId> {
        let module = GuestModule::compile(&self.engine, bytes)?;
        let id = ModuleId(self.next_module_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(module = %id, bytes = bytes.len(), imports = module.ledger().imports.len(), "registered module");
        self.modules.insert(id, Arc::new(module));
        Ok(id)
    }

    /// Fetches bytes from a source and registers them.
    pub async fn register_source(&self, source: &dyn ModuleSource) -> Result<ModuleId> {
        tracing::debug!(source = %source.describe(), "fetching module");
        let bytes = source.fetch().await?;
        self.register_module(&bytes)
    }

    pub fn get_module(&self, id: ModuleId) -> Result<Arc<GuestModule>> {
        self.modules
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::ModuleNotFound(id))
    }

    /// Starts building an instance of a registered module.
    pub fn instantiate(self: &Arc<Self>, id: ModuleId) -> Result<InstanceBuilder> {
        let module = self.get_module(id)?;
        Ok(InstanceBuilder::new(Arc::clone(self), module))
    }

    /// Compiles `bytes` and instantiates them against `stubs` with the
    /// default exchange configuration.
    ///
    /// The module is not kept in the registry; the instance holds it.
    pub async fn load(self: &Arc<Self>, bytes: &[u8], stubs: StubTable) -> Result<GuestInstance> {
        let module = Arc::new(GuestModule::compile(&self.engine, bytes)?);
        InstanceBuilder::new(Arc::clone(self), module)
            .stubs(stubs)
            .build()
            .await
    }

    pub(crate) fn register_instance(&self, instance: GuestInstance) -> InstanceId {
        let id = instance.id();
        self.instances.insert(id, instance);
        id
    }

    pub(crate) fn next_instance_id(&self) -> InstanceId {
        InstanceId(self.next_instance_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get_instance(&self, id: InstanceId) -> Result<GuestInstance> {
        self.instances
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::InstanceNotFound(id))
    }

    /// Drops the registry's handle. The store goes away once every other
    /// clone of the handle is dropped too.
    pub fn release_instance(&self, id: InstanceId) -> Result<()> {
        self.instances
            .remove(&id)
            .ok_or(Error::InstanceNotFound(id))?;
        tracing::debug!(instance = %id, "released instance");
        Ok(())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}
