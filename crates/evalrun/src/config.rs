//! # Exchange configuration
//!
//! Which exports the exchange channel calls, how it passes the script, and
//! how strictly it treats the result. All of these are deployment parameters;
//! two presets cover the common QuickJS builds.

/// Default cap on result length: 1 MiB.
pub const DEFAULT_MAX_RESULT_LEN: usize = 1 << 20;

/// Reactor initializer defined by the WASI application ABI. Called after
/// instantiation whenever the module exports it.
pub const WASI_INITIALIZE: &str = "_initialize";

/// How the evaluation export receives the script.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvalArgs {
    /// No arguments; the guest evaluates whatever it last allocated.
    None,
    /// The script offset; the guest finds the end via the NUL terminator.
    Pointer,
    /// The script offset and its byte length.
    PointerLength,
}

/// How the evaluation export's return value leads to the result string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultAbi {
    /// The return value is the offset of the result string.
    Offset,
    /// The return value is an opaque guest value (e.g. a boxed `JSValue`)
    /// that the named export converts into a string offset.
    Handle { export: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportAbi {
    /// Allocation export: `(len: i32) -> offset: i32`. Returns 0 or a negative value on failure.
    pub alloc: String,
    /// Evaluation export.
    pub eval: String,
    pub args: EvalArgs,
    pub result: ResultAbi,
    /// Whether the host writes a zero byte after the script. The allocator
    /// must then reserve `len + 1` bytes.
    pub nul_terminated: bool,
    /// Guest setup export, `() -> ()`, run once after `_initialize`. Skipped
    /// when the module does not export it.
    pub init: Option<String>,
}

impl ExportAbi {
    /// A Rust guest wrapping QuickJS: `allocate_script(len)` then `run_js()`.
    pub fn rust_guest() -> Self {
        Self {
            alloc: "allocate_script".into(),
            eval: "run_js".into(),
            args: EvalArgs::None,
            result: ResultAbi::Offset,
            nul_terminated: true,
            init: Some("init".into()),
        }
    }

    /// A C build of QuickJS: `malloc(len)`, `js_eval(ptr)`, then `js_get_string(value)`.
    pub fn c_guest() -> Self {
        Self {
            alloc: "malloc".into(),
            eval: "js_eval".into(),
            args: EvalArgs::Pointer,
            result: ResultAbi::Handle {
                export: "js_get_string".into(),
            },
            nul_terminated: true,
            init: None,
        }
    }
}

impl Default for ExportAbi {
    fn default() -> Self {
        Self::rust_guest()
    }
}

/// What to do with result bytes that are not valid UTF-8.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DecodeMode {
    /// Fail with `InvalidEncoding`.
    #[default]
    Strict,
    /// Substitute U+FFFD for invalid sequences.
    Lossy,
}

/// Configuration of the script exchange channel for one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalConfig {
    pub memory_export: String,
    pub abi: ExportAbi,
    /// Longest accepted result string, in bytes, not counting the terminator.
    pub max_result_len: usize,
    pub decode: DecodeMode,
}

impl EvalConfig {
    pub fn new() -> Self {
        Self {
            memory_export: "memory".into(),
            abi: ExportAbi::default(),
            max_result_len: DEFAULT_MAX_RESULT_LEN,
            decode: DecodeMode::default(),
        }
    }

    pub fn memory_export(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    pub fn abi(mut self, abi: ExportAbi) -> Self {
        self.abi = abi;
        self
    }

    pub fn max_result_len(mut self, len: usize) -> Self {
        self.max_result_len = len;
        self
    }

    pub fn decode(mut self, mode: DecodeMode) -> Self {
        self.decode = mode;
        self
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self::new()
    }
}
