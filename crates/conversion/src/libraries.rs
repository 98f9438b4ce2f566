//! Library lookup at project and application level.  
//! 專案與應用程式層級的函式庫查詢。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ConversionError, ConversionResult};
use crate::macros::{MacroMap, PathMacroTranslator};
use crate::views::{ComponentSettings, LIBRARY_TABLE_COMPONENT};
use crate::xml::{find_component, XmlElement};

pub const APPLICATION_LIBRARIES_FILE: &str = "applicationLibraries.xml";
pub const LIBRARY_ELEMENT: &str = "library";
pub const LIBRARY_NAME_ATTRIBUTE: &str = "name";
const CLASSES_ELEMENT: &str = "CLASSES";
const JAR_SEPARATOR: &str = "!/";

/// Scope a library is registered at.  
/// 函式庫註冊的層級。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryLevel {
    Project,
    Application,
}

impl LibraryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryLevel::Project => "project",
            LibraryLevel::Application => "application",
        }
    }
}

impl fmt::Display for LibraryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LibraryLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "project" => Ok(LibraryLevel::Project),
            "application" => Ok(LibraryLevel::Application),
            other => Err(format!("unknown library level: {other}")),
        }
    }
}

/// Strips the `scheme://` prefix of a VFS URL.
pub fn url_to_path(url: &str) -> &str {
    match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    }
}

/// Drops the `!/…` suffix that addresses entries inside an archive.
pub fn local_path(path: &str) -> &str {
    match path.find(JAR_SEPARATOR) {
        Some(index) => &path[..index],
        None => path.strip_suffix('!').unwrap_or(path),
    }
}

/// `url` attributes of `CLASSES/root`, in declaration order.
pub fn class_root_urls(library: &XmlElement) -> Vec<String> {
    library
        .child(CLASSES_ELEMENT)
        .map(|classes| {
            classes
                .children_named("root")
                .filter_map(|root| root.attribute("url").map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Finds `<library name="…">` among the direct children of a library table.
pub fn find_library_in_table<'a>(table: &'a XmlElement, name: &str) -> Option<&'a XmlElement> {
    table.find_child_with_attribute(LIBRARY_ELEMENT, LIBRARY_NAME_ATTRIBUTE, name)
}

/// Locates library definitions and turns their class roots into local paths.  
/// 尋找函式庫定義並將其類別根路徑轉為本機路徑。
#[derive(Debug, Clone, Default)]
pub struct LibraryResolver {
    options_dir: Option<PathBuf>,
}

impl LibraryResolver {
    pub fn new(options_dir: Option<PathBuf>) -> Self {
        Self { options_dir }
    }

    pub fn options_dir(&self) -> Option<&Path> {
        self.options_dir.as_deref()
    }

    pub fn find_project_library(
        &self,
        libraries: &ComponentSettings,
        name: &str,
    ) -> Option<XmlElement> {
        libraries
            .elements()
            .into_iter()
            .find(|library| library.attribute(LIBRARY_NAME_ATTRIBUTE) == Some(name))
    }

    /// Reads the global library table. No options directory or no file means no library.  
    /// 讀取全域函式庫表；未設定選項目錄或檔案不存在時回傳 None。
    pub fn find_application_library(&self, name: &str) -> ConversionResult<Option<XmlElement>> {
        let Some(options_dir) = &self.options_dir else {
            return Ok(None);
        };
        let file = options_dir.join(APPLICATION_LIBRARIES_FILE);
        if !file.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&file).map_err(|source| ConversionError::Io {
            path: file.clone(),
            source,
        })?;
        let root = XmlElement::parse(&contents)
            .map_err(|source| ConversionError::Parse { path: file, source })?;
        Ok(find_component(&root, LIBRARY_TABLE_COMPONENT)
            .and_then(|table| find_library_in_table(table, name))
            .cloned())
    }

    /// Local paths of every class root of `library`, expanded with `macros`.  
    /// 展開巨集後的所有類別根路徑。
    pub fn class_roots(
        &self,
        library: &XmlElement,
        macros: &MacroMap,
        translator: &PathMacroTranslator,
    ) -> Vec<PathBuf> {
        class_root_urls(library)
            .iter()
            .map(|url| {
                let expanded = translator.expand(url_to_path(url), macros, true);
                PathBuf::from(local_path(&expanded))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn urls_become_local_paths() {
        assert_eq!(url_to_path("file://$PROJECT_DIR$/lib/a.jar"), "$PROJECT_DIR$/lib/a.jar");
        assert_eq!(url_to_path("/already/a/path"), "/already/a/path");
        assert_eq!(local_path("/x/lib.jar!/"), "/x/lib.jar");
        assert_eq!(local_path("/x/lib.jar!/org/Example.class"), "/x/lib.jar");
        assert_eq!(local_path("/x/classes"), "/x/classes");
    }

    #[test]
    fn class_roots_are_expanded() {
        let library = XmlElement::parse(
            r#"<library name="L">
  <CLASSES>
    <root url="jar://$PROJECT_DIR$/lib/a.jar!/" />
    <root url="file://$UNKNOWN$/classes" />
  </CLASSES>
  <SOURCES><root url="file://$PROJECT_DIR$/src" /></SOURCES>
</library>"#,
        )
        .unwrap();
        let translator = PathMacroTranslator::for_host();
        let macros = translator.expand_map(Path::new("/work/p"), None);
        let roots = LibraryResolver::default().class_roots(&library, &macros, &translator);
        assert_eq!(
            roots,
            vec![
                PathBuf::from("/work/p/lib/a.jar"),
                PathBuf::from("$UNKNOWN$/classes")
            ]
        );
    }

    #[test]
    fn application_library_lookup() {
        let dir = tempdir().unwrap();
        let resolver = LibraryResolver::new(Some(dir.path().to_path_buf()));
        assert!(resolver.find_application_library("G").unwrap().is_none());

        fs::write(
            dir.path().join(APPLICATION_LIBRARIES_FILE),
            r#"<application>
  <component name="libraryTable">
    <library name="G"><CLASSES><root url="file:///opt/g.jar" /></CLASSES></library>
  </component>
</application>"#,
        )
        .unwrap();
        let library = resolver.find_application_library("G").unwrap().unwrap();
        assert_eq!(class_root_urls(&library), vec!["file:///opt/g.jar"]);
        assert!(resolver.find_application_library("H").unwrap().is_none());

        assert!(LibraryResolver::default()
            .find_application_library("G")
            .unwrap()
            .is_none());
    }

    #[test]
    fn level_parses_from_text() {
        assert_eq!("project".parse::<LibraryLevel>(), Ok(LibraryLevel::Project));
        assert_eq!(
            "application".parse::<LibraryLevel>(),
            Ok(LibraryLevel::Application)
        );
        assert!("module".parse::<LibraryLevel>().is_err());
    }
}
