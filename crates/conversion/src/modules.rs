//! Module descriptor views and the registry indexing them by file and by name.  
//! 模組描述檔檢視，以及依檔案與名稱索引的登錄表。

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::error::{ConversionError, ConversionResult};
use crate::layout::ModuleFileEntry;
use crate::settings_file::{SettingsFileCache, SettingsXmlFile};
use crate::util::canonical_path;
use crate::xml::{find_component, find_or_create_component, XmlElement};

pub const MODULE_FILE_EXTENSION: &str = "iml";
pub const ROOT_MANAGER_COMPONENT: &str = "NewModuleRootManager";
pub const FACET_MANAGER_COMPONENT: &str = "FacetManager";

const ORDER_ENTRY_ELEMENT: &str = "orderEntry";

/// Settings of one module, backed by its cached descriptor file.  
/// 單一模組的設定，背後為快取中的描述檔。
#[derive(Debug)]
pub struct ModuleSettings {
    file: Rc<SettingsXmlFile>,
    module_file: PathBuf,
    module_dir: PathBuf,
    name: String,
}

impl ModuleSettings {
    fn load(module_file: &Path, cache: &SettingsFileCache) -> ConversionResult<Self> {
        if !module_file.is_file() {
            return Err(ConversionError::MissingFile {
                path: module_file.to_path_buf(),
            });
        }
        let file = cache.get_or_create(module_file)?;
        let name = module_name_from_file(module_file);
        let module_dir = module_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self {
            file,
            module_file: module_file.to_path_buf(),
            module_dir,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_file(&self) -> &Path {
        &self.module_file
    }

    /// Directory that `$MODULE_DIR$` stands for.
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn settings_file(&self) -> &Rc<SettingsXmlFile> {
        &self.file
    }

    /// Value of the `type` attribute on the `<module>` root.
    pub fn module_type(&self) -> Option<String> {
        self.file.root().attribute("type").map(str::to_string)
    }

    pub fn component_element(&self, name: &str) -> Option<XmlElement> {
        find_component(&self.file.root(), name).cloned()
    }

    /// Mutates a component of the module file, creating it when absent.
    pub fn update_component<R>(&self, name: &str, write: impl FnOnce(&mut XmlElement) -> R) -> R {
        let mut root = self.file.root_mut();
        write(find_or_create_component(&mut root, name))
    }

    /// `orderEntry` elements of the root manager, in declaration order.  
    /// 依宣告順序列出 orderEntry。
    pub fn order_entries(&self) -> Vec<XmlElement> {
        self.root_manager_children(ORDER_ENTRY_ELEMENT)
    }

    /// Names of modules this module depends on.
    pub fn module_dependencies(&self) -> Vec<String> {
        self.order_entries()
            .iter()
            .filter(|entry| entry.attribute("type") == Some("module"))
            .filter_map(|entry| entry.attribute("module-name").map(str::to_string))
            .collect()
    }

    /// `library` elements of module-level libraries.  
    /// 模組層級函式庫的 library 元素。
    pub fn module_libraries(&self) -> Vec<XmlElement> {
        self.order_entries()
            .into_iter()
            .filter(|entry| entry.attribute("type") == Some("module-library"))
            .filter_map(|entry| entry.child("library").cloned())
            .collect()
    }

    pub fn content_root_urls(&self) -> Vec<String> {
        self.root_manager_children("content")
            .iter()
            .filter_map(|content| content.attribute("url").map(str::to_string))
            .collect()
    }

    /// `facet` elements of the given facet type.
    pub fn facet_elements(&self, facet_type: &str) -> Vec<XmlElement> {
        let root = self.file.root();
        find_component(&root, FACET_MANAGER_COMPONENT)
            .map(|manager| {
                manager
                    .children_named("facet")
                    .filter(|facet| facet.attribute("type") == Some(facet_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn root_manager_children(&self, element: &str) -> Vec<XmlElement> {
        let root = self.file.root();
        find_component(&root, ROOT_MANAGER_COMPONENT)
            .map(|manager| manager.children_named(element).cloned().collect())
            .unwrap_or_default()
    }
}

/// Module name as recorded by the inventory: the descriptor file name without `.iml`.
fn module_name_from_file(module_file: &Path) -> String {
    let file_name = module_file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if extension.eq_ignore_ascii_case(MODULE_FILE_EXTENSION) => {
            stem.to_string()
        }
        _ => file_name,
    }
}

/// Lazily built index of module settings by file and by name.  
/// 依檔案與名稱延遲建立的模組設定索引。
///
/// Both indices are filled together whenever a module is first materialized.
/// Not synchronized: one registry serves one driver at a time.
/// A by-name miss walks the inventory again, so descriptors written after an
/// earlier miss are still found.
#[derive(Debug, Default)]
pub struct ModuleSettingsRegistry {
    by_file: RefCell<HashMap<PathBuf, Rc<ModuleSettings>>>,
    by_name: RefCell<HashMap<String, Rc<ModuleSettings>>>,
}

impl ModuleSettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of the module stored in `module_file`; the file must exist.  
    /// 取得指定描述檔的模組設定；檔案必須存在。
    pub fn by_file(
        &self,
        module_file: &Path,
        cache: &SettingsFileCache,
    ) -> ConversionResult<Rc<ModuleSettings>> {
        let key = canonical_path(module_file);
        if let Some(existing) = self.by_file.borrow().get(&key) {
            return Ok(Rc::clone(existing));
        }
        let settings = Rc::new(ModuleSettings::load(module_file, cache)?);
        debug!(module = settings.name(), path = %module_file.display(), "indexed module");
        self.by_file.borrow_mut().insert(key, Rc::clone(&settings));
        self.by_name
            .borrow_mut()
            .insert(settings.name().to_string(), Rc::clone(&settings));
        Ok(settings)
    }

    /// Settings of the module called `name`, materializing the inventory on each miss.
    /// Files that fail to load are skipped.  
    /// 依名稱取得模組設定；每次找不到時重新載入清單，無法載入的檔案略過。
    pub fn by_name(
        &self,
        name: &str,
        inventory: &[ModuleFileEntry],
        cache: &SettingsFileCache,
    ) -> Option<Rc<ModuleSettings>> {
        if let Some(existing) = self.by_name.borrow().get(name) {
            return Some(Rc::clone(existing));
        }
        for entry in inventory {
            match self.by_file(entry.path(), cache) {
                Ok(_) => {}
                Err(ConversionError::MissingFile { path }) => {
                    debug!(path = %path.display(), "module file not on disk yet");
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping unreadable module file");
                }
            }
        }
        self.by_name.borrow().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_file.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const MODULE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<module type="JAVA_MODULE" version="4">
  <component name="NewModuleRootManager">
    <content url="file://$MODULE_DIR$">
      <sourceFolder url="file://$MODULE_DIR$/src" isTestSource="false" />
    </content>
    <orderEntry type="sourceFolder" forTests="false" />
    <orderEntry type="module" module-name="core" />
    <orderEntry type="module-library">
      <library>
        <CLASSES>
          <root url="jar://$MODULE_DIR$/lib/x.jar!/" />
        </CLASSES>
      </library>
    </orderEntry>
  </component>
  <component name="FacetManager">
    <facet type="web" name="Web" />
    <facet type="jpa" name="JPA" />
  </component>
</module>
"#;

    #[test]
    fn module_settings_expose_descriptor_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.iml");
        fs::write(&path, MODULE_XML).unwrap();
        let cache = SettingsFileCache::new();
        let registry = ModuleSettingsRegistry::new();

        let module = registry.by_file(&path, &cache).unwrap();
        assert_eq!(module.name(), "app");
        assert_eq!(module.module_dir(), dir.path());
        assert_eq!(module.module_type().as_deref(), Some("JAVA_MODULE"));
        assert_eq!(module.order_entries().len(), 3);
        assert_eq!(module.module_dependencies(), vec!["core"]);
        assert_eq!(module.module_libraries().len(), 1);
        assert_eq!(module.content_root_urls(), vec!["file://$MODULE_DIR$"]);
        assert_eq!(module.facet_elements("web").len(), 1);
    }

    #[test]
    fn missing_module_file_fails_loudly() {
        let dir = tempdir().unwrap();
        let cache = SettingsFileCache::new();
        let registry = ModuleSettingsRegistry::new();
        let err = registry
            .by_file(&dir.path().join("ghost.iml"), &cache)
            .unwrap_err();
        assert!(matches!(err, ConversionError::MissingFile { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn by_name_skips_broken_files_and_indexes_the_rest() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.iml");
        let broken = dir.path().join("broken.iml");
        fs::write(&good, MODULE_XML).unwrap();
        fs::write(&broken, "<module><component></module>").unwrap();
        let inventory = vec![
            ModuleFileEntry::new(&broken),
            ModuleFileEntry::new(dir.path().join("absent.iml")),
            ModuleFileEntry::new(&good),
        ];
        let cache = SettingsFileCache::new();
        let registry = ModuleSettingsRegistry::new();

        let found = registry.by_name("good", &inventory, &cache).unwrap();
        assert_eq!(found.module_file(), good.as_path());
        assert!(registry.by_name("broken", &inventory, &cache).is_none());
        assert!(registry.by_name("nobody", &inventory, &cache).is_none());
        assert_eq!(registry.len(), 1);

        let by_file = registry.by_file(&good, &cache).unwrap();
        assert!(Rc::ptr_eq(&found, &by_file));
    }

    #[test]
    fn descriptor_written_after_a_miss_is_found_by_name() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a.iml");
        let later = dir.path().join("b.iml");
        fs::write(&first, MODULE_XML).unwrap();
        let inventory = vec![ModuleFileEntry::new(&first), ModuleFileEntry::new(&later)];
        let cache = SettingsFileCache::new();
        let registry = ModuleSettingsRegistry::new();

        assert!(registry.by_name("zzz", &inventory, &cache).is_none());
        assert!(registry.by_name("b", &inventory, &cache).is_none());

        fs::write(&later, MODULE_XML).unwrap();
        let found = registry.by_name("b", &inventory, &cache).unwrap();
        assert_eq!(found.module_file(), later.as_path());
        assert_eq!(registry.len(), 2);
        let a = registry.by_name("a", &inventory, &cache).unwrap();
        assert!(Rc::ptr_eq(&a, &registry.by_file(&first, &cache).unwrap()));
    }

    #[test]
    fn module_name_strips_only_the_descriptor_extension() {
        assert_eq!(module_name_from_file(Path::new("/p/my.module.iml")), "my.module");
        assert_eq!(module_name_from_file(Path::new("/p/plain")), "plain");
    }
}
