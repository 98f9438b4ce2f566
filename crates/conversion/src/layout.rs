//! Project storage layout: which files describe a project and where they live.  
//! 專案儲存配置：哪些檔案描述專案以及其位置。

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ConversionError, ConversionResult};
use crate::macros::PathMacroTranslator;
use crate::xml::{find_component, XmlElement};

pub const SETTINGS_DIRECTORY: &str = ".idea";
pub const PROJECT_FILE_EXTENSION: &str = ".ipr";
pub const WORKSPACE_FILE_EXTENSION: &str = ".iws";
pub const MODULES_FILE: &str = "modules.xml";
pub const WORKSPACE_FILE: &str = "workspace.xml";
pub const MODULE_MANAGER_COMPONENT: &str = "ProjectModuleManager";
pub const LIBRARIES_DIRECTORY: &str = "libraries";
pub const ARTIFACTS_DIRECTORY: &str = "artifacts";
pub const RUN_CONFIGURATIONS_DIRECTORY: &str = "runConfigurations";

const SETTINGS_SUBDIRECTORIES: [&str; 3] = [
    LIBRARIES_DIRECTORY,
    ARTIFACTS_DIRECTORY,
    RUN_CONFIGURATIONS_DIRECTORY,
];

/// How a project persists its settings.  
/// 專案設定的儲存方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScheme {
    /// A `.idea` directory of individual settings files.
    DirectoryBased,
    /// One `.ipr` descriptor plus an `.iws` workspace file.
    SingleFile,
}

impl StorageScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScheme::DirectoryBased => "directory-based",
            StorageScheme::SingleFile => "single-file",
        }
    }
}

/// Absolute path of one module descriptor listed in the module inventory.  
/// 模組清單中單一模組描述檔的絕對路徑。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleFileEntry {
    path: PathBuf,
}

impl ModuleFileEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Paths derived once from the project root.  
/// 由專案根路徑一次推導出的各項路徑。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    scheme: StorageScheme,
    base_dir: PathBuf,
    settings_dir: Option<PathBuf>,
    project_file: PathBuf,
    workspace_file: PathBuf,
    modules_file: PathBuf,
}

impl ProjectLayout {
    /// Classifies `project_path` as a directory-based or single-file project.  
    /// 判斷專案為目錄式或單檔式。
    pub fn resolve(project_path: &Path) -> ConversionResult<Self> {
        let project_file = absolute(project_path);
        let metadata = fs::metadata(&project_file).map_err(|err| ConversionError::Layout {
            path: project_file.clone(),
            reason: err.to_string(),
        })?;

        if metadata.is_dir() {
            let settings_dir = project_file.join(SETTINGS_DIRECTORY);
            Ok(Self {
                scheme: StorageScheme::DirectoryBased,
                base_dir: project_file.clone(),
                modules_file: settings_dir.join(MODULES_FILE),
                workspace_file: settings_dir.join(WORKSPACE_FILE),
                settings_dir: Some(settings_dir),
                project_file,
            })
        } else {
            let base_dir = project_file
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| ConversionError::Layout {
                    path: project_file.clone(),
                    reason: "project file has no parent directory".to_string(),
                })?;
            Ok(Self {
                scheme: StorageScheme::SingleFile,
                base_dir,
                settings_dir: None,
                modules_file: project_file.clone(),
                workspace_file: workspace_file_for(&project_file),
                project_file,
            })
        }
    }

    pub fn scheme(&self) -> StorageScheme {
        self.scheme
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn settings_dir(&self) -> Option<&Path> {
        self.settings_dir.as_deref()
    }

    pub fn project_file(&self) -> &Path {
        &self.project_file
    }

    pub fn workspace_file(&self) -> &Path {
        &self.workspace_file
    }

    pub fn modules_file(&self) -> &Path {
        &self.modules_file
    }

    /// File holding the settings group stored as `file_name` in the `.idea` directory.
    /// Single-file projects keep every group inside the descriptor.
    pub fn settings_file(&self, file_name: &str) -> PathBuf {
        match &self.settings_dir {
            Some(dir) => dir.join(file_name),
            None => self.project_file.clone(),
        }
    }

    /// `.xml` files directly inside `.idea/<dir_name>`, sorted by name.
    /// Empty for single-file projects.
    pub fn settings_xml_files(&self, dir_name: &str) -> Vec<PathBuf> {
        match &self.settings_dir {
            Some(dir) => xml_files_in(&dir.join(dir_name)),
            None => Vec::new(),
        }
    }

    /// Reads the module inventory, expanding each recorded path with the project macros.
    /// An absent inventory file or module-manager section yields no modules.  
    /// 讀取模組清單並展開路徑巨集；若不存在則回傳空清單。
    pub fn read_module_files(
        &self,
        translator: &PathMacroTranslator,
    ) -> ConversionResult<Vec<ModuleFileEntry>> {
        let contents = match fs::read_to_string(&self.modules_file) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.modules_file.display(), "no module inventory");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(ConversionError::Layout {
                    path: self.modules_file.clone(),
                    reason: err.to_string(),
                })
            }
        };
        let root = XmlElement::parse(&contents).map_err(|err| ConversionError::Layout {
            path: self.modules_file.clone(),
            reason: err.to_string(),
        })?;

        let Some(modules) = find_component(&root, MODULE_MANAGER_COMPONENT)
            .and_then(|manager| manager.child("modules"))
        else {
            return Ok(Vec::new());
        };

        let macros = translator.expand_map(&self.base_dir, None);
        Ok(modules
            .children_named("module")
            .filter_map(|module| module.attribute("filepath"))
            .map(|file_path| {
                let expanded = translator.expand(file_path, &macros, true);
                ModuleFileEntry::new(PathBuf::from(to_system_dependent(&expanded)))
            })
            .collect())
    }

    /// Every file that describes the project on disk.  
    /// 描述此專案的所有檔案。
    pub fn all_project_files(&self, modules: &[ModuleFileEntry]) -> BTreeSet<PathBuf> {
        let mut files: BTreeSet<PathBuf> = modules
            .iter()
            .map(|module| module.path().to_path_buf())
            .collect();
        match &self.settings_dir {
            None => {
                files.insert(self.project_file.clone());
                files.insert(self.workspace_file.clone());
            }
            Some(dir) => {
                files.extend(xml_files_in(dir));
                for subdirectory in SETTINGS_SUBDIRECTORIES {
                    files.extend(xml_files_in(&dir.join(subdirectory)));
                }
            }
        }
        files
    }
}

/// `foo.ipr` -> `foo.iws`; names without the descriptor extension get it appended.
fn workspace_file_for(project_file: &Path) -> PathBuf {
    let raw = project_file.to_string_lossy();
    let stem = raw.strip_suffix(PROJECT_FILE_EXTENSION).unwrap_or(&raw);
    PathBuf::from(format!("{stem}{WORKSPACE_FILE_EXTENSION}"))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn to_system_dependent(path: &str) -> String {
    if cfg!(windows) {
        path.replace('/', "\\")
    } else {
        path.to_string()
    }
}

/// Regular `.xml` files one level below `dir`; dot-prefixed entries are skipped.
fn xml_files_in(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case("xml"))
        })
        .map(|entry| entry.into_path())
        .collect()
}
