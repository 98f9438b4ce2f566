//! Conversion context: one project opened for migration.  
//! 轉換情境：為遷移而開啟的單一專案。
//!
//! The context resolves the project layout once, then hands out cached,
//! identity-stable views over the project's settings files. Every view of a
//! given file shares one element tree, so edits made by one conversion are
//! visible to the next and are written exactly once by [`ConversionContext::save_files`].
//!
//! The context is single-threaded by construction (`Rc`/`RefCell` inside):
//! one driver uses it at a time and calls providers sequentially.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::ConversionConfig;
use crate::error::ConversionResult;
use crate::layout::{
    ModuleFileEntry, ProjectLayout, StorageScheme, ARTIFACTS_DIRECTORY, LIBRARIES_DIRECTORY,
    MODULES_FILE, RUN_CONFIGURATIONS_DIRECTORY,
};
use crate::ledger::{ConversionLedger, ConverterProvider};
use crate::libraries::{LibraryLevel, LibraryResolver};
use crate::macros::{PathMacroTranslator, MODULE_DIR_MACRO, PROJECT_DIR_MACRO};
use crate::modules::{ModuleSettings, ModuleSettingsRegistry};
use crate::settings_file::{SettingsFileCache, SettingsXmlFile};
use crate::views::{
    ComponentSettings, SettingsGroup, ARTIFACT_MANAGER_COMPONENT, LIBRARY_TABLE_COMPONENT,
    RUN_MANAGER_COMPONENT, SHARED_RUN_CONFIGURATIONS_COMPONENT,
};
use crate::xml::XmlElement;

pub const COMPILER_FILE: &str = "compiler.xml";
pub const MISC_FILE: &str = "misc.xml";

type LazyView = OnceCell<Rc<ComponentSettings>>;
type LazyOptionalView = OnceCell<Option<Rc<ComponentSettings>>>;

/// Facade over layout, macros, settings cache, modules, libraries and ledger.  
/// 整合專案配置、巨集、設定快取、模組、函式庫與轉換紀錄的介面。
#[derive(Debug)]
pub struct ConversionContext {
    layout: ProjectLayout,
    translator: PathMacroTranslator,
    libraries: LibraryResolver,
    module_files: Vec<ModuleFileEntry>,
    non_existing_module_files: Vec<PathBuf>,
    cache: SettingsFileCache,
    modules: ModuleSettingsRegistry,
    ledger: ConversionLedger,
    compiler_settings: LazyOptionalView,
    root_manager_settings: LazyOptionalView,
    modules_settings: LazyOptionalView,
    project_file_version_settings: LazyOptionalView,
    project_settings: LazyView,
    workspace_settings: LazyView,
    run_manager_settings: LazyView,
    project_libraries_settings: LazyView,
    artifacts_settings: LazyView,
}

impl ConversionContext {
    /// Opens the project at `project_path` with default configuration.
    pub fn open(project_path: impl AsRef<Path>) -> ConversionResult<Self> {
        Self::new(project_path, &ConversionConfig::default())
    }

    /// Resolves the layout, reads the module inventory and loads the ledger.
    /// Layout failures abort construction.  
    /// 解析專案配置、讀取模組清單並載入轉換紀錄；配置錯誤會中止建立。
    pub fn new(project_path: impl AsRef<Path>, config: &ConversionConfig) -> ConversionResult<Self> {
        let layout = ProjectLayout::resolve(project_path.as_ref())?;
        let translator = config.translator();
        let module_files = layout.read_module_files(&translator)?;
        let non_existing_module_files: Vec<PathBuf> = module_files
            .iter()
            .filter(|entry| !entry.path().is_file())
            .map(|entry| entry.path().to_path_buf())
            .collect();
        for missing in &non_existing_module_files {
            warn!(path = %missing.display(), "module file listed in the project does not exist");
        }
        info!(
            project = %layout.project_file().display(),
            scheme = layout.scheme().as_str(),
            modules = module_files.len(),
            "opened project for conversion"
        );

        let mut context = Self {
            layout,
            translator,
            libraries: LibraryResolver::new(config.options_dir.clone()),
            module_files,
            non_existing_module_files,
            cache: SettingsFileCache::new(),
            modules: ModuleSettingsRegistry::new(),
            ledger: ConversionLedger::new(),
            compiler_settings: OnceCell::new(),
            root_manager_settings: OnceCell::new(),
            modules_settings: OnceCell::new(),
            project_file_version_settings: OnceCell::new(),
            project_settings: OnceCell::new(),
            workspace_settings: OnceCell::new(),
            run_manager_settings: OnceCell::new(),
            project_libraries_settings: OnceCell::new(),
            artifacts_settings: OnceCell::new(),
        };
        context.ledger = ConversionLedger::load(context.project_file_version_settings().as_deref());
        Ok(context)
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn storage_scheme(&self) -> StorageScheme {
        self.layout.scheme()
    }

    pub fn project_base_dir(&self) -> &Path {
        self.layout.base_dir()
    }

    pub fn project_file(&self) -> &Path {
        self.layout.project_file()
    }

    /// The `.idea` directory; `None` for single-file projects.
    pub fn settings_base_dir(&self) -> Option<&Path> {
        self.layout.settings_dir()
    }

    pub fn workspace_file(&self) -> &Path {
        self.layout.workspace_file()
    }

    pub fn module_files(&self) -> &[ModuleFileEntry] {
        &self.module_files
    }

    /// Inventory entries whose descriptor was missing when the project was opened.
    pub fn non_existing_module_files(&self) -> &[PathBuf] {
        &self.non_existing_module_files
    }

    pub fn translator(&self) -> &PathMacroTranslator {
        &self.translator
    }

    pub fn all_project_files(&self) -> BTreeSet<PathBuf> {
        self.layout.all_project_files(&self.module_files)
    }

    /// Expands project-level macros, matching names as the filesystem does.  
    /// 展開專案層級巨集。
    pub fn expand_path(&self, path: &str) -> String {
        let macros = self.translator.expand_map(self.project_base_dir(), None);
        self.translator
            .expand(path, &macros, self.translator.case_sensitive())
    }

    /// Expands project- and module-level macros of a path owned by `module`.
    pub fn expand_module_path(&self, path: &str, module: &ModuleSettings) -> String {
        let macros = self
            .translator
            .expand_map(self.project_base_dir(), Some(module.module_dir()));
        self.translator.expand(path, &macros, true)
    }

    /// Reintroduces `$PROJECT_DIR$` (and global macros) into an absolute path.  
    /// 將絕對路徑收合為 `$PROJECT_DIR$` 等巨集形式。
    pub fn collapse_path(&self, path: &str) -> String {
        self.translator
            .collapse(path, self.project_base_dir(), PROJECT_DIR_MACRO)
    }

    pub fn collapse_module_path(&self, path: &str, module: &ModuleSettings) -> String {
        self.translator
            .collapse(path, module.module_dir(), MODULE_DIR_MACRO)
    }

    /// Shared handle to the settings file at `path`, loaded on first use.
    pub fn get_or_create_file(&self, path: &Path) -> ConversionResult<Rc<SettingsXmlFile>> {
        self.cache.get_or_create(path)
    }

    pub fn settings_cache(&self) -> &SettingsFileCache {
        &self.cache
    }

    /// Settings of the module stored in `module_file`. The file must exist.
    pub fn module_settings_by_file(
        &self,
        module_file: &Path,
    ) -> ConversionResult<Rc<ModuleSettings>> {
        self.modules.by_file(module_file, &self.cache)
    }

    /// Settings of the module called `name`, or `None` when no module has that name.  
    /// 依名稱取得模組設定；不存在時回傳 None。
    pub fn module_settings(&self, name: &str) -> Option<Rc<ModuleSettings>> {
        self.modules.by_name(name, &self.module_files, &self.cache)
    }

    /// Local class-root paths of the library `name` at `level`. Lookup failures yield nothing.  
    /// 取得函式庫的類別根路徑；查詢失敗時回傳空清單。
    pub fn library_class_roots(&self, name: &str, level: LibraryLevel) -> Vec<PathBuf> {
        let library = match level {
            LibraryLevel::Project => match self.project_libraries_settings() {
                Ok(libraries) => self.libraries.find_project_library(&libraries, name),
                Err(err) => {
                    debug!(library = name, error = %err, "project libraries unavailable");
                    None
                }
            },
            LibraryLevel::Application => match self.libraries.find_application_library(name) {
                Ok(library) => library,
                Err(err) => {
                    debug!(library = name, error = %err, "application libraries unavailable");
                    None
                }
            },
        };
        match library {
            Some(library) => self.class_roots(&library, None),
            None => {
                debug!(library = name, level = level.as_str(), "library not found");
                Vec::new()
            }
        }
    }

    /// Class roots of `library`, expanded with the project macros and, when given, the module's.
    pub fn class_roots(&self, library: &XmlElement, module: Option<&ModuleSettings>) -> Vec<PathBuf> {
        let macros = self
            .translator
            .expand_map(self.project_base_dir(), module.map(ModuleSettings::module_dir));
        self.libraries.class_roots(library, &macros, &self.translator)
    }

    /// Class roots of every module-level library declared by `module`.
    pub fn module_library_roots(&self, module: &ModuleSettings) -> Vec<PathBuf> {
        module
            .module_libraries()
            .iter()
            .flat_map(|library| self.class_roots(library, Some(module)))
            .collect()
    }

    pub fn is_conversion_already_performed(&self, provider: &dyn ConverterProvider) -> bool {
        self.ledger.is_already_performed(provider.id())
    }

    pub fn performed_conversion_ids(&self) -> Vec<String> {
        self.ledger.performed_ids()
    }

    /// Records the providers that ran and writes the touched files in `files`, in order.
    /// The ledger file is always written when the ledger changed.
    /// Files saved before a failure stay saved.  
    /// 記錄已執行的轉換並依序儲存指定檔案；轉換紀錄有變更時一律寫回。
    pub fn save_files<I, P>(
        &self,
        files: I,
        used_providers: &[&dyn ConverterProvider],
    ) -> ConversionResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let ledger_view = if used_providers
            .iter()
            .any(|provider| !provider.can_detect_completion())
        {
            Some(self.ledger_settings()?)
        } else {
            None
        };
        let ledger_changed = self.ledger.record(used_providers, ledger_view.as_deref());

        let mut written = self.cache.save(files)?;
        if ledger_changed {
            if let Some(file) = ledger_view.as_ref().and_then(|view| view.primary_file()) {
                if file.save()? {
                    written += 1;
                }
            }
        }
        info!(written, "saved converted project files");
        Ok(())
    }

    fn ledger_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        if let Some(settings) = self.project_file_version_settings() {
            return Ok(settings);
        }
        let file = self.cache.get_or_create(&self.layout.settings_file(MISC_FILE))?;
        Ok(Rc::new(ComponentSettings::single(
            SettingsGroup::ProjectFileVersion,
            file,
        )))
    }

    pub fn compiler_settings(&self) -> Option<Rc<ComponentSettings>> {
        self.compiler_settings
            .get_or_init(|| self.open_project_settings(SettingsGroup::Compiler, COMPILER_FILE))
            .clone()
    }

    pub fn project_root_manager_settings(&self) -> Option<Rc<ComponentSettings>> {
        self.root_manager_settings
            .get_or_init(|| {
                self.open_project_settings(SettingsGroup::ProjectRootManager, MISC_FILE)
            })
            .clone()
    }

    pub fn modules_settings(&self) -> Option<Rc<ComponentSettings>> {
        self.modules_settings
            .get_or_init(|| self.open_project_settings(SettingsGroup::Modules, MODULES_FILE))
            .clone()
    }

    pub fn project_file_version_settings(&self) -> Option<Rc<ComponentSettings>> {
        self.project_file_version_settings
            .get_or_init(|| {
                self.open_project_settings(SettingsGroup::ProjectFileVersion, MISC_FILE)
            })
            .clone()
    }

    /// View over the settings file `file_name` (the descriptor for single-file projects).
    /// `None` when the file does not exist or cannot be parsed.
    pub fn create_project_settings(&self, file_name: &str) -> Option<Rc<ComponentSettings>> {
        self.open_project_settings(SettingsGroup::Project, file_name)
    }

    fn open_project_settings(
        &self,
        group: SettingsGroup,
        file_name: &str,
    ) -> Option<Rc<ComponentSettings>> {
        let path = self.layout.settings_file(file_name);
        if self.storage_scheme() == StorageScheme::DirectoryBased && !path.exists() {
            return None;
        }
        match self.cache.get_or_create(&path) {
            Ok(file) => Some(Rc::new(ComponentSettings::single(group, file))),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "settings file unavailable");
                None
            }
        }
    }

    /// Project-wide settings: the descriptor, or `.idea/misc.xml` for directory-based projects.
    pub fn project_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        self.project_settings
            .get_or_try_init(|| -> ConversionResult<_> {
                let path = match self.storage_scheme() {
                    StorageScheme::SingleFile => self.layout.project_file().to_path_buf(),
                    StorageScheme::DirectoryBased => self.layout.settings_file(MISC_FILE),
                };
                let file = self.cache.get_or_create(&path)?;
                Ok(Rc::new(ComponentSettings::single(SettingsGroup::Project, file)))
            })
            .cloned()
    }

    pub fn workspace_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        self.workspace_settings
            .get_or_try_init(|| -> ConversionResult<_> {
                let file = self.cache.get_or_create(self.layout.workspace_file())?;
                Ok(Rc::new(ComponentSettings::single(SettingsGroup::Workspace, file)))
            })
            .cloned()
    }

    /// Run configurations from the workspace plus the shared ones.  
    /// 工作區與共享的執行設定。
    pub fn run_manager_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        self.run_manager_settings
            .get_or_try_init(|| -> ConversionResult<_> {
                let mut sources = vec![(
                    self.cache.get_or_create(self.layout.workspace_file())?,
                    RUN_MANAGER_COMPONENT,
                )];
                sources.extend(
                    self.shared_sources(RUN_CONFIGURATIONS_DIRECTORY, SHARED_RUN_CONFIGURATIONS_COMPONENT)?,
                );
                Ok(Rc::new(ComponentSettings::collection(
                    SettingsGroup::RunManager,
                    sources,
                )))
            })
            .cloned()
    }

    pub fn project_libraries_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        self.project_libraries_settings
            .get_or_try_init(|| -> ConversionResult<_> {
                let sources = self.shared_sources(LIBRARIES_DIRECTORY, LIBRARY_TABLE_COMPONENT)?;
                Ok(Rc::new(ComponentSettings::collection(
                    SettingsGroup::ProjectLibraries,
                    sources,
                )))
            })
            .cloned()
    }

    pub fn artifacts_settings(&self) -> ConversionResult<Rc<ComponentSettings>> {
        self.artifacts_settings
            .get_or_try_init(|| -> ConversionResult<_> {
                let sources = self.shared_sources(ARTIFACTS_DIRECTORY, ARTIFACT_MANAGER_COMPONENT)?;
                Ok(Rc::new(ComponentSettings::collection(
                    SettingsGroup::Artifacts,
                    sources,
                )))
            })
            .cloned()
    }

    /// The descriptor for single-file projects, or every file of `.idea/<dir_name>`.
    fn shared_sources(
        &self,
        dir_name: &str,
        component: &'static str,
    ) -> ConversionResult<Vec<(Rc<SettingsXmlFile>, &'static str)>> {
        let paths = match self.storage_scheme() {
            StorageScheme::SingleFile => vec![self.layout.project_file().to_path_buf()],
            StorageScheme::DirectoryBased => self.layout.settings_xml_files(dir_name),
        };
        paths
            .iter()
            .map(|path| Ok((self.cache.get_or_create(path)?, component)))
            .collect()
    }
}
