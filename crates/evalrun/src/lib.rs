pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod host;
pub mod instance;
pub mod ledger;
pub mod memory;
pub mod module;
pub mod runtime;
pub mod source;

pub use builder::InstanceBuilder;
pub use config::DecodeMode;
pub use config::EvalArgs;
pub use config::EvalConfig;
pub use config::ExportAbi;
pub use config::ResultAbi;
pub use context::Budget;
pub use context::HostCtx;
pub use error::Error;
pub use error::Result;
pub use host::StubBehavior;
pub use host::StubTable;
pub use instance::GuestInstance;
pub use runtime::InstanceId;
pub use runtime::ModuleId;
pub use runtime::Runtime;

#[cfg(test)]
mod tests;
