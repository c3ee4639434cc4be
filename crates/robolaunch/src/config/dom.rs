//! Owned element tree over quick-xml
//!
//! The launch loader works on a small in-memory tree rather than streaming
//! events; launch documents are tiny and the loader needs random access to
//! child tags and reconstructed snippets for error reporting.

use indexmap::IndexMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;

/// One XML element: tag name, attributes in document order, child elements.
///
/// Text nodes, comments, and processing instructions are discarded; the
/// launch grammar is attribute-only.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Parse a document and return its root element.
    pub fn parse_document(xml: &str) -> Result<XmlElement, DomError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    stack.push(Self::from_start(e)?);
                }
                Ok(Event::Empty(ref e)) => {
                    let element = Self::from_start(e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None if root.is_none() => root = Some(element),
                        None => return Err(DomError::MultipleRoots),
                    }
                }
                Ok(Event::End(_)) => {
                    let element = stack.pop().ok_or(DomError::UnbalancedTags)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None if root.is_none() => root = Some(element),
                        None => return Err(DomError::MultipleRoots),
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(DomError::Syntax(e.to_string())),
            }
        }

        if !stack.is_empty() {
            return Err(DomError::UnbalancedTags);
        }
        root.ok_or(DomError::EmptyDocument)
    }

    /// Parse a document from a file on disk.
    pub fn parse_file(path: &Path) -> Result<XmlElement, DomError> {
        let xml = std::fs::read_to_string(path).map_err(|e| DomError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse_document(&xml)
    }

    fn from_start(e: &BytesStart<'_>) -> Result<XmlElement, DomError> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = IndexMap::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| DomError::Syntax(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| DomError::Syntax(e.to_string()))?
                .into_owned();
            attrs.insert(key, value);
        }
        Ok(XmlElement {
            name,
            attrs,
            children: Vec::new(),
        })
    }

    /// Raw attribute value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Reconstruct the opening tag for error messages.
    pub fn snippet(&self) -> String {
        let mut out = format!("<{}", self.name);
        for (key, value) in &self.attrs {
            out.push_str(&format!(" {key}=\"{value}\""));
        }
        out.push_str("/>");
        out
    }
}

/// Errors from building the element tree
#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("Failed to read XML file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid XML syntax: {0}")]
    Syntax(String),

    #[error("XML document has unbalanced tags")]
    UnbalancedTags,

    #[error("XML document has more than one root element")]
    MultipleRoots,

    #[error("XML document is empty")]
    EmptyDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_elements() {
        let root = XmlElement::parse_document(
            r#"<launch>
                 <group ns="cam">
                   <node pkg="p" type="t" name="n"/>
                 </group>
               </launch>"#,
        )
        .unwrap();

        assert_eq!(root.name, "launch");
        assert_eq!(root.children.len(), 1);
        let group = &root.children[0];
        assert_eq!(group.name, "group");
        assert_eq!(group.attr("ns"), Some("cam"));
        assert_eq!(group.children[0].attr("pkg"), Some("p"));
    }

    #[test]
    fn test_text_is_ignored() {
        let root =
            XmlElement::parse_document("<launch>stray text<node pkg=\"p\" type=\"t\"/></launch>")
                .unwrap();
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_attribute_entities_unescaped() {
        let root = XmlElement::parse_document(r#"<param name="x" value="a &amp; b"/>"#).unwrap();
        assert_eq!(root.attr("value"), Some("a & b"));
    }

    #[test]
    fn test_malformed_document() {
        assert!(XmlElement::parse_document("<launch><node></launch>").is_err());
        assert!(XmlElement::parse_document("").is_err());
    }

    #[test]
    fn test_snippet_roundtrip() {
        let root = XmlElement::parse_document(r#"<node pkg="p" type="t"/>"#).unwrap();
        assert_eq!(root.snippet(), r#"<node pkg="p" type="t"/>"#);
    }
}
