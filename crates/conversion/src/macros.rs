//! Path macro expansion and collapsing.  
//! 路徑巨集的展開與收合。
//!
//! Stored paths reference well-known directories through `$NAME$` macros so
//! that project files stay portable. Expansion turns macros into absolute
//! paths when reading; collapsing reintroduces them when writing.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::xml::{find_component, XmlElement};

pub const PROJECT_DIR_MACRO: &str = "PROJECT_DIR";
pub const MODULE_DIR_MACRO: &str = "MODULE_DIR";

const MACRO_DELIMITER: char = '$';
const PATH_MACROS_FILE: &str = "path.macros.xml";
const PATH_MACROS_COMPONENT: &str = "PathMacrosImpl";

/// Whether the host filesystem distinguishes `a` from `A`.  
/// 主機檔案系統是否區分大小寫。
pub fn is_file_system_case_sensitive() -> bool {
    !cfg!(any(windows, target_os = "macos"))
}

/// Converts a path to the `/`-separated form used inside settings files.
pub fn to_system_independent(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn macro_reference(name: &str) -> String {
    format!("{MACRO_DELIMITER}{name}{MACRO_DELIMITER}")
}

/// Ordered macro-name to absolute-path mapping used for expansion.  
/// 用於展開的有序巨集對照表。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroMap {
    entries: Vec<(String, String)>,
}

impl MacroMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `$name$ -> value`; a later registration of the same name wins.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = trim_trailing_separator(&value.into()).to_string();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces every known `$NAME$` reference in `text`. Unknown macros are kept verbatim.  
    /// 取代已知巨集；未知巨集保持原樣。
    pub fn substitute(&self, text: &str, case_sensitive: bool) -> String {
        if !text.contains(MACRO_DELIMITER) {
            return text.to_string();
        }
        let mut result = text.to_string();
        for (name, value) in &self.entries {
            let reference = macro_reference(name);
            result = replace_matches(&result, &reference, value, case_sensitive, |_, _| true);
        }
        result
    }
}

/// Absolute-root to macro mapping used for collapsing. Longer roots are applied first.  
/// 用於收合的路徑對照表；較長的根路徑優先套用。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseMap {
    entries: Vec<(String, String)>,
}

impl CollapseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, root: impl Into<String>, macro_name: impl Into<String>) {
        let root = trim_trailing_separator(&root.into()).to_string();
        if root.is_empty() || root == "/" {
            return;
        }
        let macro_name = macro_name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == root) {
            Some(entry) => entry.1 = macro_name,
            None => self.entries.push((root, macro_name)),
        }
    }

    pub fn substitute(&self, text: &str, case_sensitive: bool) -> String {
        let mut ordered: Vec<&(String, String)> = self.entries.iter().collect();
        ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut result = text.to_string();
        for (root, macro_name) in ordered {
            let reference = macro_reference(macro_name);
            result = replace_matches(&result, root, &reference, case_sensitive, is_path_boundary);
        }
        result
    }
}

/// A root match must start the text (or follow a `scheme://` prefix) and end at a separator.
fn is_path_boundary(text: &str, range: (usize, usize)) -> bool {
    let (start, end) = range;
    let before_ok = start == 0 || text[..start].ends_with("://");
    let after_ok = match text[end..].chars().next() {
        None => true,
        Some(next) => next == '/' || next == '!',
    };
    before_ok && after_ok
}

fn trim_trailing_separator(value: &str) -> &str {
    if value.len() > 1 {
        value.strip_suffix('/').unwrap_or(value)
    } else {
        value
    }
}

fn replace_matches<F>(
    text: &str,
    pattern: &str,
    replacement: &str,
    case_sensitive: bool,
    accept: F,
) -> String
where
    F: Fn(&str, (usize, usize)) -> bool,
{
    if pattern.is_empty() || text.len() < pattern.len() {
        return text.to_string();
    }
    let haystack = text.as_bytes();
    let needle = pattern.as_bytes();
    let mut output = String::with_capacity(text.len());
    let mut copied = 0;
    let mut index = 0;
    while index + needle.len() <= haystack.len() {
        let window = &haystack[index..index + needle.len()];
        let matched = if case_sensitive {
            window == needle
        } else {
            window.eq_ignore_ascii_case(needle)
        };
        if matched
            && text.is_char_boundary(index)
            && text.is_char_boundary(index + needle.len())
            && accept(text, (index, index + needle.len()))
        {
            output.push_str(&text[copied..index]);
            output.push_str(replacement);
            index += needle.len();
            copied = index;
        } else {
            index += 1;
        }
    }
    output.push_str(&text[copied..]);
    output
}

/// Application-wide path macros, passed explicitly to each translator.  
/// 應用程式層級的路徑巨集，明確傳入轉換器。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMacros {
    macros: BTreeMap<String, String>,
}

impl PathMacros {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(macros: BTreeMap<String, String>) -> Self {
        Self { macros }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.macros.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.macros
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Merges the `PathMacrosImpl` component of `<options_dir>/path.macros.xml`.
    /// Entries already present are kept. A missing or unreadable file adds nothing.  
    /// 合併選項目錄中的 path.macros.xml；讀取失敗時忽略。
    pub fn merge_options_dir(&mut self, options_dir: &Path) {
        let file = options_dir.join(PATH_MACROS_FILE);
        let contents = match fs::read_to_string(&file) {
            Ok(contents) => contents,
            Err(err) => {
                debug!(path = %file.display(), error = %err, "no global path macros file");
                return;
            }
        };
        let root = match XmlElement::parse(&contents) {
            Ok(root) => root,
            Err(err) => {
                debug!(path = %file.display(), error = %err, "ignoring malformed path macros file");
                return;
            }
        };
        let Some(component) = find_component(&root, PATH_MACROS_COMPONENT) else {
            return;
        };
        for entry in component.children_named("macro") {
            if let (Some(name), Some(value)) = (entry.attribute("name"), entry.attribute("value")) {
                self.macros
                    .entry(name.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    /// Adds the global macros to `map` without overriding names already registered.
    pub fn add_expands(&self, map: &mut MacroMap) {
        for (name, value) in &self.macros {
            if map.get(name).is_none() {
                map.add(name.clone(), value.clone());
            }
        }
    }

    pub fn add_replacements(&self, map: &mut CollapseMap) {
        for (name, value) in &self.macros {
            map.add(value.clone(), name.clone());
        }
    }
}

/// Expands and collapses macros in stored paths.  
/// 在儲存的路徑中展開與收合巨集。
#[derive(Debug, Clone)]
pub struct PathMacroTranslator {
    globals: PathMacros,
    case_sensitive: bool,
}

impl PathMacroTranslator {
    pub fn new(globals: PathMacros, case_sensitive: bool) -> Self {
        Self {
            globals,
            case_sensitive,
        }
    }

    /// Translator using the host filesystem's case sensitivity and no global macros.
    pub fn for_host() -> Self {
        Self::new(PathMacros::new(), is_file_system_case_sensitive())
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn globals(&self) -> &PathMacros {
        &self.globals
    }

    /// Builds a fresh expansion map for the project and, optionally, one module.  
    /// 建立專案（及可選模組）的展開對照表。
    pub fn expand_map(&self, project_dir: &Path, module_dir: Option<&Path>) -> MacroMap {
        let mut map = MacroMap::new();
        map.add(PROJECT_DIR_MACRO, to_system_independent(project_dir));
        if let Some(module_dir) = module_dir {
            map.add(MODULE_DIR_MACRO, to_system_independent(module_dir));
        }
        self.globals.add_expands(&mut map);
        map
    }

    pub fn expand(&self, path: &str, map: &MacroMap, case_sensitive: bool) -> String {
        map.substitute(path, case_sensitive)
    }

    /// Replaces `root` (and any global macro roots) in `path` with macro references.  
    /// 以巨集取代路徑中的根目錄。
    pub fn collapse(&self, path: &str, root: &Path, macro_name: &str) -> String {
        let mut map = CollapseMap::new();
        map.add(to_system_independent(root), macro_name);
        self.globals.add_replacements(&mut map);
        map.substitute(path, self.case_sensitive)
    }
}
