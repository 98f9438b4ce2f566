use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::macros::{is_file_system_case_sensitive, PathMacroTranslator, PathMacros};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read conversion config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse conversion config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings that live outside any single project.  
/// 不屬於任何單一專案的轉換設定。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Application options directory holding `applicationLibraries.xml` and `path.macros.xml`.
    #[serde(default)]
    pub options_dir: Option<PathBuf>,
    /// Extra global path macros; they take precedence over `path.macros.xml`.
    #[serde(default)]
    pub path_macros: BTreeMap<String, String>,
    /// Overrides the host filesystem's case sensitivity.
    #[serde(default)]
    pub case_sensitive_paths: Option<bool>,
}

impl ConversionConfig {
    /// Loads the config, falling back to defaults when the file is absent.  
    /// 載入設定檔；若不存在則使用預設值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn with_options_dir(mut self, options_dir: impl Into<PathBuf>) -> Self {
        self.options_dir = Some(options_dir.into());
        self
    }

    pub fn with_path_macro(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_macros.insert(name.into(), value.into());
        self
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive_paths
            .unwrap_or_else(is_file_system_case_sensitive)
    }

    /// Global macros from the config merged with the options directory's `path.macros.xml`.
    pub fn path_macros(&self) -> PathMacros {
        let mut macros = PathMacros::from_map(self.path_macros.clone());
        if let Some(options_dir) = &self.options_dir {
            macros.merge_options_dir(options_dir);
        }
        macros
    }

    pub fn translator(&self) -> PathMacroTranslator {
        PathMacroTranslator::new(self.path_macros(), self.case_sensitive())
    }
}
