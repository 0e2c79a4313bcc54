//! # Module sources
//!
//! Where guest bytes come from. The loader only ever sees a byte vector; a
//! source decides how to obtain it.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Error;
use crate::error::Result;

#[async_trait]
pub trait ModuleSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;

    /// A short human readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Reads a `.wasm` file from disk.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModuleSource for FileSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(Error::Io)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Bytes compiled into the host binary, e.g. via `include_bytes!`.
#[derive(Clone, Copy, Debug)]
pub struct EmbeddedSource {
    name: &'static str,
    bytes: &'static [u8],
}

impl EmbeddedSource {
    pub fn new(name: &'static str, bytes: &'static [u8]) -> Self {
        Self { name, bytes }
    }
}

#[async_trait]
impl ModuleSource for EmbeddedSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }

    fn describe(&self) -> String {
        format!("embedded:{}", self.name)
    }
}
