//! # Instance Builder
//!
//! Fluent API for turning a registered module into a running guest instance.

use std::sync::Arc;

use wasmtime::Linker;
use wasmtime::Store;

use crate::config::EvalConfig;
use crate::context::Budget;
use crate::context::ContextBuilder;
use crate::context::HostCtx;
use crate::error::Error;
use crate::error::Result;
use crate::exchange::guest_failure;
use crate::host::StubTable;
use crate::instance::Exports;
use crate::instance::GuestInstance;
use crate::module::GuestModule;
use crate::runtime::Runtime;

pub struct InstanceBuilder {
    runtime: Arc<Runtime>,
    module: Arc<GuestModule>,
    stubs: StubTable,
    config: EvalConfig,
    budget: Budget,
    context_builder: ContextBuilder,
}

impl InstanceBuilder {
    pub fn new(runtime: Arc<Runtime>, module: Arc<GuestModule>) -> Self {
        Self {
            runtime,
            module,
            stubs: StubTable::wasi_preview1(),
            config: EvalConfig::default(),
            budget: Budget::default(),
            context_builder: ContextBuilder::new(),
        }
    }

    pub fn stubs(mut self, stubs: StubTable) -> Self {
        self.stubs = stubs;
        self
    }

    pub fn config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    pub fn context(mut self, f: impl FnOnce(&mut ContextBuilder)) -> Self {
        f(&mut self.context_builder);
        self
    }

    /// Validates, links and instantiates the module, runs the guest's setup
    /// exports, then registers the instance with the runtime.
    ///
    /// Nothing is registered unless every step succeeds.
    pub async fn build(self) -> Result<GuestInstance> {
        let ledger = self.module.ledger();
        ledger.check_imports(&self.stubs)?;
        ledger.check_exports(&self.config)?;
        let initializers = ledger.initializers(&self.config)?;

        let mut linker = Linker::new(self.runtime.engine());
        self.stubs.link(&mut linker, self.module.module())?;

        let ctx = HostCtx::new(
            self.context_builder,
            self.config.memory_export.clone(),
            self.stubs.clock(),
            &self.budget,
        );
        let mut store = Store::new(self.runtime.engine(), ctx);
        store.limiter(|ctx| &mut ctx.limits);

        let instance = linker
            .instantiate_async(&mut store, self.module.module())
            .await
            .map_err(initialization_error)?;

        for name in &initializers {
            let init = instance
                .get_typed_func::<(), ()>(&mut store, name)
                .map_err(Error::Engine)?;
            init.call_async(&mut store, ()).await.map_err(initialization_error)?;
            tracing::debug!(export = %name, "ran guest initializer");
        }

        let exports = Exports::resolve(&mut store, &instance, &self.config)?;

        let id = self.runtime.next_instance_id();
        let guest = GuestInstance::new(id, self.module, self.config, store, exports);
        self.runtime.register_instance(guest.clone());

        tracing::debug!(instance = %id, budget = ?self.budget, "instantiated guest");
        Ok(guest)
    }
}

fn initialization_error(e: wasmtime::Error) -> Error {
    match guest_failure(&e) {
        Some(reason) => Error::InitializationTrap(reason),
        None => Error::Engine(e),
    }
}
