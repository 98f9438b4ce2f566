use std::fs;
use std::path::PathBuf;

use projconv_conversion::{ConversionContext, ConverterProvider, ProviderInfo};
use tempfile::tempdir;

struct FacetConverter;

impl ConverterProvider for FacetConverter {
    fn id(&self) -> &str {
        "facets"
    }
}

#[test]
fn ledger_is_created_on_demand_and_reloaded_sorted() {
    let temp = tempdir().expect("tempdir");
    fs::create_dir(temp.path().join(".idea")).expect("settings dir");
    let misc = temp.path().join(".idea/misc.xml");

    {
        let context = ConversionContext::open(temp.path()).expect("open");
        assert!(context.project_file_version_settings().is_none());
        let gamma = ProviderInfo::new("Gamma");
        let detecting = ProviderInfo::self_detecting("auto");
        context
            .save_files(Vec::<PathBuf>::new(), &[&FacetConverter, &gamma, &detecting])
            .expect("save");
    }
    assert!(misc.is_file());

    let context = ConversionContext::open(temp.path()).expect("reopen");
    assert!(context.is_conversion_already_performed(&FacetConverter));
    assert!(!context.is_conversion_already_performed(&ProviderInfo::self_detecting("auto")));
    assert_eq!(context.performed_conversion_ids(), vec!["facets", "Gamma"]);
}

#[test]
fn recording_twice_keeps_one_entry() {
    let temp = tempdir().expect("tempdir");
    fs::create_dir(temp.path().join(".idea")).expect("settings dir");
    let misc = temp.path().join(".idea/misc.xml");

    for _ in 0..2 {
        let context = ConversionContext::open(temp.path()).expect("open");
        context
            .save_files([misc.clone()], &[&FacetConverter])
            .expect("save");
    }

    let contents = fs::read_to_string(&misc).expect("misc.xml");
    assert_eq!(contents.matches("value=\"facets\"").count(), 1);
    assert_eq!(contents.matches("performedConversionIds").count(), 1);
}

#[test]
fn nothing_is_written_without_recordable_providers() {
    let temp = tempdir().expect("tempdir");
    fs::create_dir(temp.path().join(".idea")).expect("settings dir");

    let context = ConversionContext::open(temp.path()).expect("open");
    context
        .save_files(Vec::<PathBuf>::new(), &[&ProviderInfo::self_detecting("auto")])
        .expect("save");
    assert!(!temp.path().join(".idea/misc.xml").exists());
}
