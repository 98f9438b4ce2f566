//! Project-format conversion context: layout detection, path macros, cached settings views
//! and the ledger of applied conversions.  
//! 專案格式轉換情境：配置偵測、路徑巨集、快取設定檢視與已套用轉換紀錄。

mod util;

pub mod config;
pub mod context;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod libraries;
pub mod macros;
pub mod modules;
pub mod settings_file;
pub mod views;
pub mod xml;

pub use config::{ConfigError, ConversionConfig};
pub use context::{ConversionContext, COMPILER_FILE, MISC_FILE};
pub use error::{ConversionError, ConversionResult};
pub use layout::{ModuleFileEntry, ProjectLayout, StorageScheme};
pub use ledger::{ConversionLedger, ConverterProvider, ProviderInfo};
pub use libraries::{LibraryLevel, LibraryResolver};
pub use macros::{
    is_file_system_case_sensitive, CollapseMap, MacroMap, PathMacroTranslator, PathMacros,
    MODULE_DIR_MACRO, PROJECT_DIR_MACRO,
};
pub use modules::{ModuleSettings, ModuleSettingsRegistry};
pub use settings_file::{SettingsFileCache, SettingsXmlFile};
pub use views::{ComponentSettings, SettingsGroup};
pub use xml::{XmlElement, XmlError};
