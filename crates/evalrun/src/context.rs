//! Store context for running guest instances.

use std::sync::Arc;

use wasmtime::StoreLimits;
use wasmtime::StoreLimitsBuilder;

use crate::host::ClockSource;

/// Resource budget for one instance.
#[derive(Clone, Debug)]
pub struct Budget {
    /// Ceiling on the guest's linear memory, in bytes.
    pub memory_bytes: usize,
    pub table_elements: usize,
}

impl Budget {
    pub fn standard() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            table_elements: 100_000,
        }
    }

    pub(crate) fn limits(&self) -> StoreLimits {
        StoreLimitsBuilder::new()
            .memory_size(self.memory_bytes)
            .table_elements(self.table_elements)
            .instances(1)
            .build()
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::standard()
    }
}

/// A staging area for state that will be baked into the `HostCtx`.
///
/// Lets the embedding application hand data to its custom stubs (a contract
/// host's block height, an account id) before the store exists.
pub struct ContextBuilder {
    pub user_data: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            user_data: anymap::Map::new(),
        }
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.user_data.insert(val);
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-instance state stored in the wasmtime `Store`.
///
/// Host stubs reach it through `Caller::data()`: the memory export name tells
/// them where the guest's pointers point, the clock answers `clock_time_get`.
pub struct HostCtx {
    pub(crate) memory_export: String,
    pub(crate) clock: Arc<dyn ClockSource>,
    pub(crate) limits: StoreLimits,
    user_data: anymap::Map<dyn anymap::any::Any + Send + Sync>,
}

impl HostCtx {
    pub(crate) fn new(
        builder: ContextBuilder,
        memory_export: String,
        clock: Arc<dyn ClockSource>,
        budget: &Budget,
    ) -> Self {
        Self {
            memory_export,
            clock,
            limits: budget.limits(),
            user_data: builder.user_data,
        }
    }

    pub fn memory_export(&self) -> &str {
        &self.memory_export
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.user_data.insert(val);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.user_data.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.user_data.get_mut::<T>()
    }
}
