//! # Guest Modules
//!
//! A compiled guest plus the facts the loader needs before instantiating it:
//! the raw bytes (kept for the module's lifetime) and its ledger of declared
//! imports and exports.

use std::sync::Arc;

use wasmtime::Engine;
use wasmtime::Module;
use wasmtime::ValType;

use crate::error::Error;
use crate::error::Result;
use crate::ledger::Ledger;

const WASM_MAGIC: [u8; 4] = *b"\0asm";
const CORE_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// Checks the 8-byte preamble of a core Wasm module.
pub fn validate_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < 8 {
        return Err(Error::MalformedModule(format!(
            "expected at least 8 header bytes, found {}",
            bytes.len()
        )));
    }
    if bytes[0..4] != WASM_MAGIC {
        return Err(Error::MalformedModule("missing \\0asm magic number".into()));
    }
    if bytes[4..8] != CORE_VERSION {
        return Err(Error::MalformedModule(format!(
            "unsupported version/layer {:02x?}; only core modules (version 1) can be loaded",
            &bytes[4..8]
        )));
    }
    Ok(())
}

/// Value types as they appear in import and export signatures.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WasmType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Ref,
}

impl From<&ValType> for WasmType {
    fn from(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Self::I32,
            ValType::I64 => Self::I64,
            ValType::F32 => Self::F32,
            ValType::F64 => Self::F64,
            ValType::V128 => Self::V128,
            ValType::Ref(_) => Self::Ref,
        }
    }
}

impl std::fmt::Display for WasmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::V128 => "v128",
            Self::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// A function signature reduced to its value types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<WasmType>,
    pub results: Vec<WasmType>,
}

impl Signature {
    pub fn new(params: &[WasmType], results: &[WasmType]) -> Self {
        Self {
            params: params.to_vec(),
            results: results.to_vec(),
        }
    }

    pub(crate) fn from_func_ty(ty: &wasmtime::FuncType) -> Self {
        Self {
            params: ty.params().map(|t| WasmType::from(&t)).collect(),
            results: ty.results().map(|t| WasmType::from(&t)).collect(),
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |tys: &[WasmType]| {
            tys.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// A compiled guest module ready for instantiation.
pub struct GuestModule {
    bytes: Arc<[u8]>,
    module: Module,
    ledger: Ledger,
}

impl GuestModule {
    /// Validates the header, compiles the bytes and records the module's ledger.
    pub fn compile(engine: &Engine, bytes: &[u8]) -> Result<Self> {
        validate_header(bytes)?;
        let module = Module::from_binary(engine, bytes)
            .map_err(|e| Error::MalformedModule(format!("{:#}", e)))?;
        let ledger = Ledger::from_module(&module);
        Ok(Self {
            bytes: Arc::from(bytes),
            module,
            ledger,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}
