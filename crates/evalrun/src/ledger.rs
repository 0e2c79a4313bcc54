//! # Ledger of declared imports and exports
//!
//! The ledger is the source of truth for what a guest module needs from the
//! host and what it offers back. The loader checks it against the stub table
//! and the exchange configuration *before* a store exists, so a module that
//! cannot be satisfied never produces a half-built instance.

use std::collections::HashMap;

use wasmtime::ExternType;
use wasmtime::Module;

use crate::config::EvalArgs;
use crate::config::EvalConfig;
use crate::config::ResultAbi;
use crate::config::WASI_INITIALIZE;
use crate::error::Error;
use crate::error::Result;
use crate::host::StubTable;
use crate::module::Signature;
use crate::module::WasmType;

/// The kind of an import or export entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Func(Signature),
    Memory,
    Table,
    Global,
    Other,
}

impl ItemKind {
    fn from_extern(ty: ExternType) -> Self {
        match ty {
            ExternType::Func(func_ty) => Self::Func(Signature::from_func_ty(&func_ty)),
            ExternType::Memory(_) => Self::Memory,
            ExternType::Table(_) => Self::Table,
            ExternType::Global(_) => Self::Global,
            _ => Self::Other,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Func(_) => "function",
            Self::Memory => "memory",
            Self::Table => "table",
            Self::Global => "global",
            Self::Other => "non-function item",
        }
    }
}

/// One entry of the module's import section.
#[derive(Clone, Debug)]
pub struct ImportDecl {
    pub module: String,
    pub name: String,
    pub kind: ItemKind,
}

impl ImportDecl {
    /// `module::name`, the form used in error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }
}

#[derive(Clone, Debug)]
pub struct Ledger {
    pub imports: Vec<ImportDecl>,
    pub exports: HashMap<String, ItemKind>,
}

impl Ledger {
    /// Introspects a compiled module.
    pub fn from_module(module: &Module) -> Self {
        let imports = module
            .imports()
            .map(|import| ImportDecl {
                module: import.module().to_string(),
                name: import.name().to_string(),
                kind: ItemKind::from_extern(import.ty()),
            })
            .collect();

        let exports = module
            .exports()
            .map(|export| (export.name().to_string(), ItemKind::from_extern(export.ty())))
            .collect();

        Self { imports, exports }
    }

    /// Verifies that every declared import has a compatible stub.
    ///
    /// Imports are checked in declaration order; the first failure wins.
    pub fn check_imports(&self, stubs: &StubTable) -> Result<()> {
        for decl in &self.imports {
            let declared = match &decl.kind {
                ItemKind::Func(sig) => sig,
                other => {
                    return Err(Error::ImportMismatch {
                        import: decl.qualified_name(),
                        details: format!("{} imports cannot be stubbed", other.describe()),
                    });
                }
            };

            let behavior = stubs
                .get(&decl.module, &decl.name)
                .ok_or_else(|| Error::MissingImport(decl.qualified_name()))?;

            if let Some(expected) = behavior.signature() {
                if &expected != declared {
                    return Err(Error::ImportMismatch {
                        import: decl.qualified_name(),
                        details: format!(
                            "stub expects {} but the module declares {}",
                            expected, declared
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Verifies the exports the exchange channel will call.
    pub fn check_exports(&self, config: &EvalConfig) -> Result<()> {
        match self.exports.get(&config.memory_export) {
            Some(ItemKind::Memory) => {}
            Some(other) => {
                return Err(Error::AbiMismatch {
                    export: config.memory_export.clone(),
                    details: format!("expected a memory, found a {}", other.describe()),
                });
            }
            None => return Err(Error::MissingExport(config.memory_export.clone())),
        }

        let abi = &config.abi;
        self.expect_func(
            &abi.alloc,
            &Signature::new(&[WasmType::I32], &[WasmType::I32]),
        )?;

        let params: &[WasmType] = match abi.args {
            EvalArgs::None => &[],
            EvalArgs::Pointer => &[WasmType::I32],
            EvalArgs::PointerLength => &[WasmType::I32, WasmType::I32],
        };
        let eval = self.func(&abi.eval)?;
        if eval.params != params {
            return Err(Error::AbiMismatch {
                export: abi.eval.clone(),
                details: format!(
                    "expected parameters {}, found {}",
                    Signature::new(params, &[]),
                    eval
                ),
            });
        }

        match &abi.result {
            ResultAbi::Offset => {
                if eval.results != [WasmType::I32] {
                    return Err(Error::AbiMismatch {
                        export: abi.eval.clone(),
                        details: format!("expected a single i32 result offset, found {}", eval),
                    });
                }
            }
            ResultAbi::Handle { export } => {
                let [handle_ty] = eval.results.as_slice() else {
                    return Err(Error::AbiMismatch {
                        export: abi.eval.clone(),
                        details: format!("expected a single result handle, found {}", eval),
                    });
                };
                self.expect_func(export, &Signature::new(&[*handle_ty], &[WasmType::I32]))?;
            }
        }

        Ok(())
    }

    /// The setup exports to run after instantiation, in call order:
    /// `_initialize`, then the configured init export. Absent exports are
    /// skipped; present ones must be `() -> ()`.
    pub fn initializers(&self, config: &EvalConfig) -> Result<Vec<String>> {
        let mut names = vec![WASI_INITIALIZE.to_string()];
        if let Some(init) = &config.abi.init {
            if init != WASI_INITIALIZE {
                names.push(init.clone());
            }
        }

        let nullary = Signature::new(&[], &[]);
        let mut found = Vec::new();
        for name in names {
            if self.exports.contains_key(&name) {
                self.expect_func(&name, &nullary)?;
                found.push(name);
            }
        }
        Ok(found)
    }

    fn func(&self, name: &str) -> Result<&Signature> {
        match self.exports.get(name) {
            Some(ItemKind::Func(sig)) => Ok(sig),
            Some(other) => Err(Error::AbiMismatch {
                export: name.to_string(),
                details: format!("expected a function, found a {}", other.describe()),
            }),
            None => Err(Error::MissingExport(name.to_string())),
        }
    }

    fn expect_func(&self, name: &str, expected: &Signature) -> Result<()> {
        let found = self.func(name)?;
        if found != expected {
            return Err(Error::AbiMismatch {
                export: name.to_string(),
                details: format!("expected {}, found {}", expected, found),
            });
        }
        Ok(())
    }
}
