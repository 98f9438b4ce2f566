use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::xml::XmlError;

/// Errors raised while opening a project or touching one of its settings files.  
/// 開啟專案或存取設定檔時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The project root or its module inventory cannot be resolved.
    #[error("cannot resolve project layout at {path}: {reason}")]
    Layout { path: PathBuf, reason: String },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: XmlError,
    },
    #[error("settings file IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings file {path} does not exist")]
    MissingFile { path: PathBuf },
}

impl ConversionError {
    pub fn path(&self) -> &Path {
        match self {
            ConversionError::Layout { path, .. }
            | ConversionError::Parse { path, .. }
            | ConversionError::Io { path, .. }
            | ConversionError::MissingFile { path } => path,
        }
    }
}

pub type ConversionResult<T> = Result<T, ConversionError>;
