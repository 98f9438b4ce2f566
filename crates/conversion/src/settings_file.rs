//! Parsed settings documents and the per-context cache that owns them.  
//! 已解析的設定文件，以及持有它們的快取。

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info};

use crate::error::{ConversionError, ConversionResult};
use crate::util::{canonical_path, write_atomic};
use crate::xml::XmlElement;

const EMPTY_ROOT_ELEMENT: &str = "project";
const EMPTY_ROOT_VERSION: &str = "4";

/// One settings file: its element tree and a dirty flag raised by any mutable access.  
/// 單一設定檔：元素樹與修改旗標。
#[derive(Debug)]
pub struct SettingsXmlFile {
    path: PathBuf,
    root: RefCell<XmlElement>,
    dirty: Cell<bool>,
    existed: bool,
}

impl SettingsXmlFile {
    /// Parses `path`, or starts from an empty `<project version="4"/>` when it does not exist.  
    /// 解析檔案；若檔案不存在則建立空白文件。
    pub fn load(path: impl Into<PathBuf>) -> ConversionResult<Self> {
        let path = path.into();
        let (root, existed) = match fs::read_to_string(&path) {
            Ok(contents) => {
                let root = XmlElement::parse(&contents).map_err(|source| {
                    ConversionError::Parse {
                        path: path.clone(),
                        source,
                    }
                })?;
                (root, true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file absent, starting from an empty document");
                let root = XmlElement::new(EMPTY_ROOT_ELEMENT)
                    .with_attribute("version", EMPTY_ROOT_VERSION);
                (root, false)
            }
            Err(source) => return Err(ConversionError::Io { path, source }),
        };
        Ok(Self {
            path,
            root: RefCell::new(root),
            dirty: Cell::new(false),
            existed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file was present on disk when it was first loaded.
    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn root(&self) -> Ref<'_, XmlElement> {
        self.root.borrow()
    }

    /// Mutable access to the tree; marks the file dirty.  
    /// 取得可變的元素樹，並標記為已修改。
    pub fn root_mut(&self) -> RefMut<'_, XmlElement> {
        self.dirty.set(true);
        self.root.borrow_mut()
    }

    pub fn update<R>(&self, op: impl FnOnce(&mut XmlElement) -> R) -> R {
        op(&mut self.root_mut())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    /// Writes the tree back when dirty. Returns whether anything was written.  
    /// 若有修改則寫回磁碟，回傳是否實際寫入。
    pub fn save(&self) -> ConversionResult<bool> {
        if !self.dirty.get() {
            return Ok(false);
        }
        let payload = self
            .root
            .borrow()
            .to_document_string()
            .map_err(|source| ConversionError::Parse {
                path: self.path.clone(),
                source,
            })?;
        write_atomic(&self.path, payload.as_bytes()).map_err(|source| ConversionError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.dirty.set(false);
        info!(path = %self.path.display(), "saved settings file");
        Ok(true)
    }
}

/// Identity-stable cache: at most one [`SettingsXmlFile`] per canonical path.  
/// 以標準路徑為鍵的快取，每個路徑至多一個實例。
///
/// Single-writer: lookups and inserts are not synchronized, so one cache must
/// only be used from one thread at a time.
#[derive(Debug, Default)]
pub struct SettingsFileCache {
    files: RefCell<HashMap<PathBuf, Rc<SettingsXmlFile>>>,
}

impl SettingsFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `path`, loading it on first use.  
    /// 取得快取中的檔案；首次存取時載入。
    pub fn get_or_create(&self, path: &Path) -> ConversionResult<Rc<SettingsXmlFile>> {
        let key = canonical_path(path);
        if let Some(existing) = self.files.borrow().get(&key) {
            return Ok(Rc::clone(existing));
        }
        let file = Rc::new(SettingsXmlFile::load(key.clone())?);
        self.files.borrow_mut().insert(key, Rc::clone(&file));
        Ok(file)
    }

    pub fn get(&self, path: &Path) -> Option<Rc<SettingsXmlFile>> {
        self.files.borrow().get(&canonical_path(path)).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(&canonical_path(path))
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }

    /// Paths of every cached file that has unsaved changes.
    pub fn dirty_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .files
            .borrow()
            .values()
            .filter(|file| file.is_dirty())
            .map(|file| file.path().to_path_buf())
            .collect();
        paths.sort();
        paths
    }

    /// Saves the dirty entries among `paths`, in order. Uncached paths are skipped.  
    /// 依序儲存指定路徑中已修改的檔案；未快取的路徑略過。
    pub fn save<I, P>(&self, paths: I) -> ConversionResult<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut written = 0;
        for path in paths {
            let Some(file) = self.get(path.as_ref()) else {
                debug!(path = %path.as_ref().display(), "skipping save of untouched settings file");
                continue;
            };
            if file.save()? {
                written += 1;
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_path_yields_same_instance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("misc.xml");
        fs::write(&path, "<project version=\"4\"/>").unwrap();

        let cache = SettingsFileCache::new();
        let first = cache.get_or_create(&path).unwrap();
        let second = cache
            .get_or_create(&dir.path().join(".").join("misc.xml"))
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));

        first
            .root_mut()
            .push_child(XmlElement::new("component").with_attribute("name", "X"));
        assert!(second.is_dirty());
        assert_eq!(second.root().children().len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_file_is_synthesized_and_written_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".idea").join("compiler.xml");
        let cache = SettingsFileCache::new();
        let file = cache.get_or_create(&path).unwrap();
        assert!(!file.existed());
        assert_eq!(file.root().name(), "project");
        assert_eq!(cache.save([&path]).unwrap(), 0);
        assert!(!path.exists());

        file.update(|root| root.set_attribute("version", "5"));
        assert_eq!(cache.save([&path]).unwrap(), 1);
        assert!(!file.is_dirty());
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("version=\"5\""));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_spellings_share_one_instance() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();

        let cache = SettingsFileCache::new();
        let direct = cache.get_or_create(&real.join(".idea/misc.xml")).unwrap();
        let linked = cache
            .get_or_create(&dir.path().join("link/.idea/misc.xml"))
            .unwrap();
        assert!(Rc::ptr_eq(&direct, &linked));
        assert_eq!(cache.len(), 1);

        direct.update(|root| root.set_attribute("version", "5"));
        assert_eq!(linked.root().attribute("version"), Some("5"));
        assert_eq!(cache.dirty_paths(), vec![direct.path().to_path_buf()]);
        assert_eq!(cache.save([dir.path().join("link/.idea/misc.xml")]).unwrap(), 1);
        assert!(cache.dirty_paths().is_empty());
        assert!(real.join(".idea/misc.xml").is_file());
    }

    #[test]
    fn save_skips_uncached_paths() {
        let dir = tempdir().unwrap();
        let cache = SettingsFileCache::new();
        assert_eq!(cache.save([dir.path().join("never.xml")]).unwrap(), 0);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.xml");
        fs::write(&path, "<project><component></project>").unwrap();
        let cache = SettingsFileCache::new();
        let err = cache.get_or_create(&path).unwrap_err();
        assert!(matches!(err, ConversionError::Parse { .. }));
        assert!(cache.is_empty());
    }
}
