//! `XmlDispatch`: a path-addressed SAX-like callback driver over
//! `quick_xml`'s streaming event reader (spec §4.9).

pub mod parsers;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::S3ClientError;

/// Node-type discriminant handed to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    ElementStart,
    ElementEnd,
    Text,
    XmlDeclaration,
}

/// One attribute on an element-start event.
#[derive(Debug, Clone)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

/// A handler is registered against a target path (or `""` for "all
/// events") and returns `true` to terminate the scan early.
pub type Handler<'h> = Box<dyn FnMut(&str, NodeType, &[XmlAttribute], Option<&str>) -> bool + 'h>;

struct Registration<'h> {
    target_path: String,
    handler: Handler<'h>,
}

/// Path-addressed dispatcher: register handlers, then run them over an
/// XML byte buffer.
pub struct XmlDispatch<'h> {
    registrations: Vec<Registration<'h>>,
}

impl<'h> Default for XmlDispatch<'h> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<'h> XmlDispatch<'h> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler against `target_path` (e.g. `"//ListBucketResult/Contents/Key"`),
    /// or `""` to receive every event.
    pub fn on(&mut self, target_path: impl Into<String>, handler: impl FnMut(&str, NodeType, &[XmlAttribute], Option<&str>) -> bool + 'h) -> &mut Self {
        self.registrations.push(Registration {
            target_path: target_path.into(),
            handler: Box::new(handler),
        });
        self
    }

    /// Run every registered handler over `xml`. Malformed prologs surface
    /// as `S3ClientError::Xml`; `quick_xml` does not expand DTDs, so
    /// disallowed-DTD processing is refused implicitly.
    pub fn run(&mut self, xml: &[u8]) -> Result<(), S3ClientError> {
        let mut reader = Reader::from_reader(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Eof) => break,
                Ok(Event::Decl(_)) => {
                    if self.dispatch(&current_path(&path), NodeType::XmlDeclaration, &[], None) {
                        break;
                    }
                }
                Ok(Event::Start(e)) => {
                    let name = element_name(&e);
                    path.push(name);
                    let attrs = collect_attrs(&e);
                    if self.dispatch(&current_path(&path), NodeType::ElementStart, &attrs, None) {
                        break;
                    }
                }
                Ok(Event::Empty(e)) => {
                    let name = element_name(&e);
                    path.push(name);
                    let attrs = collect_attrs(&e);
                    let stop = self.dispatch(&current_path(&path), NodeType::ElementStart, &attrs, None);
                    // Empty elements synthesize a paired end-element event
                    // before the stack is popped (spec §4.9).
                    let stop = stop || self.dispatch(&current_path(&path), NodeType::ElementEnd, &[], None);
                    path.pop();
                    if stop {
                        break;
                    }
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().unwrap_or_default().into_owned();
                    if !text.is_empty() {
                        if self.dispatch(&current_path(&path), NodeType::Text, &[], Some(&text)) {
                            break;
                        }
                    }
                }
                Ok(Event::End(_)) => {
                    let stop = self.dispatch(&current_path(&path), NodeType::ElementEnd, &[], None);
                    path.pop();
                    if stop {
                        break;
                    }
                }
                Ok(Event::DocType(_)) => {
                    return Err(S3ClientError::Xml("disallowed DTD processing".to_string()));
                }
                Ok(_) => {}
                Err(e) => return Err(S3ClientError::Xml(format!("malformed xml: {e}"))),
            }
            buf.clear();
        }
        Ok(())
    }

    /// Dispatch one event to every matching handler. Returns `true` if any
    /// handler signaled termination, in which case `run` stops scanning.
    fn dispatch(&mut self, path: &str, node_type: NodeType, attrs: &[XmlAttribute], text: Option<&str>) -> bool {
        for reg in &mut self.registrations {
            if reg.target_path.is_empty() || reg.target_path == path {
                if (reg.handler)(path, node_type, attrs, text) {
                    return true;
                }
            }
        }
        false
    }
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn collect_attrs(e: &BytesStart) -> Vec<XmlAttribute> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| XmlAttribute {
            name: String::from_utf8_lossy(a.key.as_ref()).into_owned(),
            value: a.unescape_value().unwrap_or_default().into_owned(),
        })
        .collect()
}

fn current_path(stack: &[String]) -> String {
    let mut s = String::new();
    for seg in stack {
        s.push('/');
        s.push_str(seg);
    }
    if s.is_empty() {
        s.push('/');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn dispatches_text_at_exact_path() {
        let xml = b"<ListBucketResult><Name>bucket</Name><Contents><Key>a</Key></Contents></ListBucketResult>";
        let seen = RefCell::new(Vec::new());
        let mut dispatch = XmlDispatch::new();
        dispatch.on("/ListBucketResult/Name", |_, _, _, text| {
            seen.borrow_mut().push(text.unwrap_or_default().to_string());
            false
        });
        dispatch.on("/ListBucketResult/Contents/Key", |_, _, _, text| {
            seen.borrow_mut().push(text.unwrap_or_default().to_string());
            false
        });
        dispatch.run(xml).unwrap();
        assert_eq!(*seen.borrow(), vec!["bucket".to_string(), "a".to_string()]);
    }

    #[test]
    fn empty_element_synthesizes_paired_end() {
        let xml = b"<Root><Empty/></Root>";
        let events = RefCell::new(Vec::new());
        let mut dispatch = XmlDispatch::new();
        dispatch.on("/Root/Empty", |_, nt, _, _| {
            events.borrow_mut().push(nt);
            false
        });
        dispatch.run(xml).unwrap();
        assert_eq!(*events.borrow(), vec![NodeType::ElementStart, NodeType::ElementEnd]);
    }

    #[test]
    fn handler_returning_true_terminates_scan() {
        let xml = b"<R><A>1</A><B>2</B></R>";
        let count = RefCell::new(0);
        let mut dispatch = XmlDispatch::new();
        dispatch.on("", |_, _, _, _| {
            *count.borrow_mut() += 1;
            true
        });
        dispatch.run(xml).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn rejects_doctype() {
        let xml = b"<!DOCTYPE foo><R/>";
        let mut dispatch = XmlDispatch::new();
        let err = dispatch.run(xml).unwrap_err();
        assert!(matches!(err, S3ClientError::Xml(_)));
    }

    #[test]
    fn attributes_available_on_element_start() {
        let xml = br#"<Grant><Grantee type="CanonicalUser"><ID>abc</ID></Grantee></Grant>"#;
        let seen_type = RefCell::new(String::new());
        let mut dispatch = XmlDispatch::new();
        dispatch.on("/Grant/Grantee", |_, nt, attrs, _| {
            if nt == NodeType::ElementStart {
                if let Some(a) = attrs.iter().find(|a| a.name == "type") {
                    *seen_type.borrow_mut() = a.value.clone();
                }
            }
            false
        });
        dispatch.run(xml).unwrap();
        assert_eq!(*seen_type.borrow(), "CanonicalUser");
    }
}
