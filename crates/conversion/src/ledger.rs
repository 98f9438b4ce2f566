//! Record of the conversions already applied to a project.  
//! 已套用於專案的轉換紀錄。

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::debug;

use crate::views::ComponentSettings;
use crate::xml::XmlElement;

pub const PROJECT_FILE_VERSION_COMPONENT: &str = "ProjectFileVersion";
const PERFORMED_IDS_OPTION: &str = "performedConversionIds";

/// A migration step as seen by the ledger.  
/// 轉換步驟在紀錄中的樣貌。
pub trait ConverterProvider {
    /// Stable identifier recorded once the conversion ran.
    fn id(&self) -> &str;

    /// Whether the provider can tell from the project files alone that it already ran.
    /// Such providers are never written to the ledger.
    fn can_detect_completion(&self) -> bool {
        false
    }
}

/// Plain provider description, handy for drivers that only know IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: String,
    pub detects_completion: bool,
}

impl ProviderInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            detects_completion: false,
        }
    }

    pub fn self_detecting(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            detects_completion: true,
        }
    }
}

impl ConverterProvider for ProviderInfo {
    fn id(&self) -> &str {
        &self.id
    }

    fn can_detect_completion(&self) -> bool {
        self.detects_completion
    }
}

/// Case-insensitive order with exact comparison as tie-breaker.
pub fn case_insensitive_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Set of applied conversion IDs. It only ever grows.  
/// 已套用的轉換 ID 集合，只增不減。
#[derive(Debug, Default)]
pub struct ConversionLedger {
    performed: RefCell<BTreeSet<String>>,
}

impl ConversionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the IDs stored in the `ProjectFileVersion` component, if any.  
    /// 從 ProjectFileVersion component 讀取 ID；不存在時為空集合。
    pub fn load(settings: Option<&ComponentSettings>) -> Self {
        let performed = settings
            .and_then(|settings| {
                settings.with_component(PROJECT_FILE_VERSION_COMPONENT, read_performed_ids)
            })
            .unwrap_or_default();
        debug!(count = performed.len(), "loaded conversion ledger");
        Self {
            performed: RefCell::new(performed),
        }
    }

    pub fn is_already_performed(&self, provider_id: &str) -> bool {
        self.performed.borrow().contains(provider_id)
    }

    /// Applied IDs, sorted case-insensitively.
    pub fn performed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.performed.borrow().iter().cloned().collect();
        ids.sort_by(|a, b| case_insensitive_order(a, b));
        ids
    }

    /// Adds the IDs of providers that cannot self-detect completion and, when
    /// anything was added, writes the merged set into `settings`.
    /// Returns whether the stored set had to be rewritten.  
    /// 加入無法自行偵測的轉換 ID，並在有新增時寫回設定。
    pub fn record(
        &self,
        used_providers: &[&dyn ConverterProvider],
        settings: Option<&ComponentSettings>,
    ) -> bool {
        let recorded: BTreeSet<String> = used_providers
            .iter()
            .filter(|provider| !provider.can_detect_completion())
            .map(|provider| provider.id().to_string())
            .collect();
        if recorded.is_empty() {
            return false;
        }

        self.performed.borrow_mut().extend(recorded);
        let ids = self.performed_ids();
        match settings {
            Some(settings) => {
                settings.update_component(PROJECT_FILE_VERSION_COMPONENT, |component| {
                    write_performed_ids(component, &ids)
                });
                debug!(count = ids.len(), "recorded performed conversions");
            }
            None => debug!("no settings file to persist the conversion ledger into"),
        }
        true
    }
}

fn read_performed_ids(component: &XmlElement) -> BTreeSet<String> {
    component
        .find_child_with_attribute("option", "name", PERFORMED_IDS_OPTION)
        .and_then(|option| option.child("list"))
        .map(|list| {
            list.children_named("option")
                .filter_map(|entry| entry.attribute("value").map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn write_performed_ids(component: &mut XmlElement, ids: &[String]) {
    component.retain_children(|child| {
        !(child.name() == "option" && child.attribute("name") == Some(PERFORMED_IDS_OPTION))
    });
    let list = ids.iter().fold(XmlElement::new("list"), |list, id| {
        list.with_child(XmlElement::new("option").with_attribute("value", id.as_str()))
    });
    component.push_child(
        XmlElement::new("option")
            .with_attribute("name", PERFORMED_IDS_OPTION)
            .with_child(list),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_file::SettingsXmlFile;
    use crate::views::SettingsGroup;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    const MISC_XML: &str = r#"<project version="4">
  <component name="ProjectFileVersion">
    <option name="performedConversionIds">
      <list>
        <option value="beta" />
        <option value="Alpha" />
      </list>
    </option>
  </component>
</project>"#;

    fn view(path: std::path::PathBuf) -> (Rc<SettingsXmlFile>, ComponentSettings) {
        let file = Rc::new(SettingsXmlFile::load(path).unwrap());
        let view = ComponentSettings::single(SettingsGroup::ProjectFileVersion, Rc::clone(&file));
        (file, view)
    }

    #[test]
    fn loads_existing_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("misc.xml");
        fs::write(&path, MISC_XML).unwrap();
        let (_, view) = view(path);
        let ledger = ConversionLedger::load(Some(&view));
        assert!(ledger.is_already_performed("beta"));
        assert!(ledger.is_already_performed("Alpha"));
        assert!(!ledger.is_already_performed("gamma"));
        assert_eq!(ledger.performed_ids(), vec!["Alpha", "beta"]);
    }

    #[test]
    fn missing_section_is_empty() {
        assert!(ConversionLedger::load(None).performed_ids().is_empty());
        let dir = tempdir().unwrap();
        let (_, view) = view(dir.path().join("misc.xml"));
        assert!(ConversionLedger::load(Some(&view)).performed_ids().is_empty());
    }

    #[test]
    fn record_skips_self_detecting_providers() {
        let dir = tempdir().unwrap();
        let (file, view) = view(dir.path().join("misc.xml"));
        let ledger = ConversionLedger::load(Some(&view));
        let detecting = ProviderInfo::self_detecting("detecting");
        assert!(!ledger.record(&[&detecting], Some(&view)));
        assert!(!file.is_dirty());
        assert!(!ledger.is_already_performed("detecting"));
    }

    #[test]
    fn record_is_idempotent_and_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("misc.xml");
        fs::write(&path, MISC_XML).unwrap();
        let (file, view) = view(path.clone());
        let ledger = ConversionLedger::load(Some(&view));

        let zeta = ProviderInfo::new("zeta");
        let again = ProviderInfo::new("zeta");
        let gamma = ProviderInfo::new("Gamma");
        assert!(ledger.record(&[&zeta, &again, &gamma], Some(&view)));
        assert!(ledger.record(&[&zeta], Some(&view)));
        file.save().unwrap();

        let (_, reloaded_view) = self::view(path);
        let reloaded = ConversionLedger::load(Some(&reloaded_view));
        assert_eq!(
            reloaded.performed_ids(),
            vec!["Alpha", "beta", "Gamma", "zeta"]
        );
        let component = reloaded_view
            .component_element(PROJECT_FILE_VERSION_COMPONENT)
            .unwrap();
        assert_eq!(component.children().len(), 1);
    }
}
