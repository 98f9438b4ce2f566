//! Typed views over settings groups.  
//! 設定群組的型別化檢視。
//!
//! Every group (compiler, modules, libraries, run configurations, ...) is a
//! thin window onto one or more cached settings files. A single
//! [`ComponentSettings`] type covers them all; [`SettingsGroup`] only decides
//! which component and which child elements the view looks at.

use std::cell::Ref;
use std::rc::Rc;

use crate::settings_file::SettingsXmlFile;
use crate::xml::{find_component, find_component_mut, find_or_create_component, XmlElement};

pub const LIBRARY_TABLE_COMPONENT: &str = "libraryTable";
pub const ARTIFACT_MANAGER_COMPONENT: &str = "ArtifactManager";
pub const RUN_MANAGER_COMPONENT: &str = "RunManager";
pub const SHARED_RUN_CONFIGURATIONS_COMPONENT: &str = "ProjectRunConfigurationManager";

/// Settings group a view is scoped to.  
/// 檢視所對應的設定群組。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsGroup {
    Project,
    Compiler,
    ProjectRootManager,
    Modules,
    ProjectFileVersion,
    Workspace,
    ProjectLibraries,
    Artifacts,
    RunManager,
}

impl SettingsGroup {
    /// Element name of the entries listed by collection groups.
    pub fn element_name(&self) -> Option<&'static str> {
        match self {
            SettingsGroup::ProjectLibraries => Some("library"),
            SettingsGroup::Artifacts => Some("artifact"),
            SettingsGroup::RunManager => Some("configuration"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ComponentSource {
    file: Rc<SettingsXmlFile>,
    component: &'static str,
}

/// A component-backed view over one or more settings files.  
/// 以 component 為基礎、涵蓋一或多個設定檔的檢視。
#[derive(Debug, Clone)]
pub struct ComponentSettings {
    group: SettingsGroup,
    sources: Vec<ComponentSource>,
}

impl ComponentSettings {
    /// View over a whole file, addressed component by component.
    pub fn single(group: SettingsGroup, file: Rc<SettingsXmlFile>) -> Self {
        Self {
            group,
            sources: vec![ComponentSource {
                file,
                component: "",
            }],
        }
    }

    /// View listing the `group` entries stored under `component` of each file.
    pub fn collection(
        group: SettingsGroup,
        sources: impl IntoIterator<Item = (Rc<SettingsXmlFile>, &'static str)>,
    ) -> Self {
        Self {
            group,
            sources: sources
                .into_iter()
                .map(|(file, component)| ComponentSource { file, component })
                .collect(),
        }
    }

    pub fn group(&self) -> SettingsGroup {
        self.group
    }

    pub fn files(&self) -> impl Iterator<Item = &Rc<SettingsXmlFile>> {
        self.sources.iter().map(|source| &source.file)
    }

    /// File that receives newly created components.
    pub fn primary_file(&self) -> Option<&Rc<SettingsXmlFile>> {
        self.sources.first().map(|source| &source.file)
    }

    pub fn root_element(&self) -> Option<Ref<'_, XmlElement>> {
        self.primary_file().map(|file| file.root())
    }

    /// Copy of `<component name="…">` from the primary file.  
    /// 取得主要檔案中指定 component 的複本。
    pub fn component_element(&self, name: &str) -> Option<XmlElement> {
        self.with_component(name, XmlElement::clone)
    }

    pub fn with_component<R>(&self, name: &str, read: impl FnOnce(&XmlElement) -> R) -> Option<R> {
        let file = self.primary_file()?;
        let root = file.root();
        find_component(&root, name).map(read)
    }

    /// Mutates `<component name="…">` in the primary file, creating it when absent.  
    /// 修改主要檔案中的 component；不存在時建立。
    pub fn update_component<R>(
        &self,
        name: &str,
        write: impl FnOnce(&mut XmlElement) -> R,
    ) -> Option<R> {
        let file = self.primary_file()?;
        let mut root = file.root_mut();
        Some(write(find_or_create_component(&mut root, name)))
    }

    /// Copies of every entry of a collection group, in file order.  
    /// 依檔案順序列出集合群組的所有項目。
    pub fn elements(&self) -> Vec<XmlElement> {
        let Some(element_name) = self.group.element_name() else {
            return Vec::new();
        };
        let mut elements = Vec::new();
        for source in &self.sources {
            let root = source.file.root();
            if let Some(component) = find_component(&root, source.component) {
                elements.extend(component.children_named(element_name).cloned());
            }
        }
        elements
    }

    /// First entry whose `name` attribute equals `name`.
    pub fn element_named(&self, name: &str) -> Option<XmlElement> {
        self.elements()
            .into_iter()
            .find(|element| element.attribute("name") == Some(name))
    }

    /// Applies `write` to every entry; only files that hold entries are marked dirty.  
    /// 對每個項目套用修改；只有含項目的檔案會被標記為已修改。
    pub fn update_elements(&self, mut write: impl FnMut(&mut XmlElement)) -> usize {
        let Some(element_name) = self.group.element_name() else {
            return 0;
        };
        let mut touched = 0;
        for source in &self.sources {
            let has_entries = find_component(&source.file.root(), source.component)
                .is_some_and(|component| component.child(element_name).is_some());
            if !has_entries {
                continue;
            }
            let mut root = source.file.root_mut();
            if let Some(component) = find_component_mut(&mut root, source.component) {
                for element in component.children_named_mut(element_name) {
                    write(element);
                    touched += 1;
                }
            }
        }
        touched
    }
}
