//! Mutable element tree used for project settings documents.  
//! 專案設定文件使用的可變 XML 元素樹。
//!
//! Parsing and serialization are delegated to `quick-xml`; this module only
//! keeps the tree that conversions read and rewrite. Comments and processing
//! instructions are not preserved, and the text of mixed-content elements is
//! concatenated.

use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

pub const COMPONENT_ELEMENT: &str = "component";
pub const NAME_ATTRIBUTE: &str = "name";

/// Errors raised while reading or writing a settings document.  
/// 讀寫設定文件時的錯誤。
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Syntax(#[from] quick_xml::Error),
    #[error("document has no root element")]
    MissingRoot,
    #[error("document has more than one root element")]
    MultipleRoots,
    #[error("closing tag </{0}> has no matching opening tag")]
    UnbalancedTag(String),
    #[error("element <{0}> is never closed")]
    UnclosedElement(String),
}

/// One element of a settings document together with its subtree.  
/// 設定文件中的單一元素與其子樹。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Sets or replaces an attribute, keeping the original attribute order.  
    /// 設定或取代屬性，並保留原有順序。
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(name, _)| name == key)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    fn append_text(&mut self, text: &str) {
        match &mut self.text {
            Some(existing) => existing.push_str(text),
            None => self.text = Some(text.to_string()),
        }
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn children_named_mut<'a>(
        &'a mut self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a mut XmlElement> {
        self.children.iter_mut().filter(move |child| child.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut XmlElement> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    /// First child named `name` whose `attribute` equals `value`.  
    /// 尋找名稱與屬性值皆相符的第一個子元素。
    pub fn find_child_with_attribute(
        &self,
        name: &str,
        attribute: &str,
        value: &str,
    ) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|child| child.name == name && child.attribute(attribute) == Some(value))
    }

    /// Appends a child and returns a handle to it.
    pub fn push_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Returns the first child matching `predicate`, appending `make()` when none does.  
    /// 取得符合條件的子元素；若不存在則建立後附加。
    pub fn find_or_push_child<P, F>(&mut self, predicate: P, make: F) -> &mut XmlElement
    where
        P: Fn(&XmlElement) -> bool,
        F: FnOnce() -> XmlElement,
    {
        let index = match self.children.iter().position(predicate) {
            Some(index) => index,
            None => {
                self.children.push(make());
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    pub fn retain_children<F>(&mut self, keep: F)
    where
        F: FnMut(&XmlElement) -> bool,
    {
        self.children.retain(keep);
    }

    /// Parses a complete document and returns its root element.  
    /// 解析完整文件並回傳根元素。
    pub fn parse(source: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(source);
        reader.trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from_start(&reader, &start)?),
                Event::Empty(start) => {
                    let element = element_from_start(&reader, &start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        XmlError::UnbalancedTag(decode_name(end.name().as_ref()))
                    })?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.append_text(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        current.append_text(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::UnclosedElement(open.name));
        }
        root.ok_or(XmlError::MissingRoot)
    }

    /// Serializes the element as a standalone document with a UTF-8 declaration.  
    /// 以含 UTF-8 宣告的獨立文件輸出。
    pub fn to_document_string(&self) -> Result<String, XmlError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_into(&mut writer)?;
        let mut output = String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned();
        output.push('\n');
        Ok(output)
    }

    fn write_into<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        let text = self.text.as_deref().filter(|text| !text.is_empty());
        if self.children.is_empty() && text.is_none() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if let Some(text) = text {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn element_from_start(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<XmlElement, XmlError> {
    let mut element = XmlElement::new(decode_name(start.name().as_ref()));
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = decode_name(attribute.key.as_ref());
        let value = attribute.decode_and_unescape_value(reader)?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_some() => Err(XmlError::MultipleRoots),
        None => {
            *root = Some(element);
            Ok(())
        }
    }
}

fn decode_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn is_component(element: &XmlElement, name: &str) -> bool {
    element.name == COMPONENT_ELEMENT && element.attribute(NAME_ATTRIBUTE) == Some(name)
}

/// Finds `<component name="…">` directly below `root`. Files that hold a single
/// component use it as the document root, in which case `root` itself matches.  
/// 在根元素下尋找指定名稱的 component；單一 component 檔案的根元素本身亦可符合。
pub fn find_component<'a>(root: &'a XmlElement, name: &str) -> Option<&'a XmlElement> {
    if is_component(root, name) {
        return Some(root);
    }
    root.children.iter().find(|child| is_component(child, name))
}

pub fn find_component_mut<'a>(root: &'a mut XmlElement, name: &str) -> Option<&'a mut XmlElement> {
    if is_component(root, name) {
        return Some(root);
    }
    root.children.iter_mut().find(|child| is_component(child, name))
}

/// Finds `<component name="…">` below `root`, appending an empty one when absent.  
/// 尋找 component，若不存在則建立。
pub fn find_or_create_component<'a>(root: &'a mut XmlElement, name: &str) -> &'a mut XmlElement {
    if is_component(root, name) {
        return root;
    }
    root.find_or_push_child(
        |child| is_component(child, name),
        || XmlElement::new(COMPONENT_ELEMENT).with_attribute(NAME_ATTRIBUTE, name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project version="4">
  <component name="ProjectModuleManager">
    <modules>
      <module fileurl="file://$PROJECT_DIR$/a.iml" filepath="$PROJECT_DIR$/a.iml" />
    </modules>
  </component>
</project>
"#;

    #[test]
    fn parse_keeps_structure_and_attributes() {
        let root = XmlElement::parse(MODULES_XML).unwrap();
        assert_eq!(root.name(), "project");
        assert_eq!(root.attribute("version"), Some("4"));
        let manager = find_component(&root, "ProjectModuleManager").unwrap();
        let module = manager.child("modules").unwrap().child("module").unwrap();
        assert_eq!(module.attribute("filepath"), Some("$PROJECT_DIR$/a.iml"));
    }

    #[test]
    fn serialized_document_parses_back_to_same_tree() {
        let mut root = XmlElement::parse(MODULES_XML).unwrap();
        find_or_create_component(&mut root, "Extra")
            .push_child(XmlElement::new("option").with_attribute("value", "a<b & \"c\""));
        root.push_child(XmlElement::new("note")).set_text("x < y");

        let text = root.to_document_string().unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        let reparsed = XmlElement::parse(&text).unwrap();
        assert_eq!(reparsed, root);
    }

    #[test]
    fn find_or_create_component_reuses_existing_component() {
        let mut root = XmlElement::parse(MODULES_XML).unwrap();
        find_or_create_component(&mut root, "ProjectModuleManager");
        assert_eq!(root.children_named(COMPONENT_ELEMENT).count(), 1);
        find_or_create_component(&mut root, "Other");
        assert_eq!(root.children_named(COMPONENT_ELEMENT).count(), 2);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(XmlElement::parse("<project><component></project>").is_err());
        assert!(matches!(
            XmlElement::parse("   "),
            Err(XmlError::MissingRoot)
        ));
        assert!(XmlElement::parse("<project>").is_err());
    }

    #[test]
    fn component_root_matches_itself() {
        let root = XmlElement::parse(
            r#"<component name="libraryTable"><library name="L1"/></component>"#,
        )
        .unwrap();
        let table = find_component(&root, "libraryTable").unwrap();
        assert_eq!(table.children().len(), 1);
        assert!(find_component(&root, "other").is_none());
    }

    #[test]
    fn set_attribute_replaces_in_place() {
        let mut element = XmlElement::new("root")
            .with_attribute("a", "1")
            .with_attribute("b", "2");
        element.set_attribute("a", "3");
        let collected: Vec<_> = element.attributes().collect();
        assert_eq!(collected, vec![("a", "3"), ("b", "2")]);
        assert_eq!(element.remove_attribute("b"), Some("2".to_string()));
        assert!(element.attribute("b").is_none());
    }
}
