//! # Error Definitions
//!
//! Every failure the host can observe while loading a guest or exchanging a
//! script with it. All of them are recovered at the call boundary and handed
//! back to the embedding caller; none of them take the host process down.

use crate::runtime::InstanceId;
use crate::runtime::ModuleId;

#[derive(Debug)]
pub enum Error {
    /// The bytes are not a core Wasm module (bad magic, wrong version, or failed to compile).
    MalformedModule(String),
    /// The module declares an import that has no stub bound in the table.
    MissingImport(String),
    /// A stub is bound, but cannot satisfy the declared import.
    ImportMismatch { import: String, details: String },
    /// A configured export is absent from the module.
    MissingExport(String),
    /// A configured export exists but has the wrong kind or signature.
    AbiMismatch { export: String, details: String },
    /// The module's start function trapped or exited during instantiation.
    InitializationTrap(String),
    /// The guest allocator could not provide room for the script.
    AllocationFailed { requested: usize },
    /// A host read or write would fall outside the guest's current memory.
    OutOfBoundsAccess { offset: u64, len: u64, memory_size: u64 },
    /// No terminating zero byte was found within the scan limit.
    UnterminatedResult { offset: u64, scanned: u64 },
    /// The result bytes are not valid UTF-8 and strict decoding was requested.
    InvalidEncoding { valid_up_to: usize },
    /// The guest trapped, exited, or signalled failure while evaluating.
    EvaluationTrap(String),
    /// The instance trapped or corrupted itself earlier and must be replaced.
    InstancePoisoned(InstanceId),
    ModuleNotFound(ModuleId),
    InstanceNotFound(InstanceId),
    Io(std::io::Error),
    Engine(wasmtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedModule(msg) => write!(f, "Malformed module: {}", msg),
            Self::MissingImport(name) => write!(f, "Missing import: no stub bound for '{}'", name),
            Self::ImportMismatch { import, details } => {
                write!(f, "Import '{}' cannot be stubbed: {}", import, details)
            }
            Self::MissingExport(name) => write!(f, "Missing export: '{}'", name),
            Self::AbiMismatch { export, details } => {
                write!(f, "Export '{}' does not match the exchange ABI: {}", export, details)
            }
            Self::InitializationTrap(msg) => write!(f, "Initialization trapped: {}", msg),
            Self::AllocationFailed { requested } => {
                write!(f, "Guest allocation of {} bytes failed", requested)
            }
            Self::OutOfBoundsAccess { offset, len, memory_size } => write!(
                f,
                "Out of bounds access: {} bytes at offset {} (memory size {})",
                len, offset, memory_size
            ),
            Self::UnterminatedResult { offset, scanned } => write!(
                f,
                "Unterminated result at offset {}: no terminator within {} bytes",
                offset, scanned
            ),
            Self::InvalidEncoding { valid_up_to } => {
                write!(f, "Invalid UTF-8 in result after {} bytes", valid_up_to)
            }
            Self::EvaluationTrap(msg) => write!(f, "Evaluation trapped: {}", msg),
            Self::InstancePoisoned(id) => {
                write!(f, "Instance {} is poisoned and must be replaced", id)
            }
            Self::ModuleNotFound(id) => write!(f, "Module not found: {}", id),
            Self::InstanceNotFound(id) => write!(f, "Instance not found: {}", id),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Engine(e) => write!(f, "Engine error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
