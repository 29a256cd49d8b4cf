/// Small in-memory XML element tree built with quick-xml
///
/// Device descriptions and SOAP responses are tiny, so they are read fully
/// into a tree and navigated by local element name. Namespaces are resolved
/// and kept so the SOAP envelope elements can be told apart from payload.

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parsing error at position {position}: {message}")]
    Syntax { position: u64, message: String },

    #[error("document has no root element")]
    Empty,
}

/// An XML element with its resolved namespace, trimmed text and children
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name (prefix stripped)
    pub name: String,
    pub namespace: Option<String>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// First direct child with the given local name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first direct child with the given local name
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// All direct children with the given local name, in document order
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn first_child(&self) -> Option<&Element> {
        self.children.first()
    }

    /// First element (self included) with the given local name, depth-first in document order
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.find_where(|e| e.name == name)
    }

    /// Like [`Element::find`], but the element must also be in `namespace`
    pub fn find_ns(&self, namespace: &str, name: &str) -> Option<&Element> {
        self.find_where(|e| e.name == name && e.namespace.as_deref() == Some(namespace))
    }

    fn find_where(&self, pred: impl Fn(&Element) -> bool) -> Option<&Element> {
        let mut stack = vec![self];
        while let Some(element) = stack.pop() {
            if pred(element) {
                return Some(element);
            }
            // Reverse so the leftmost child is visited first
            stack.extend(element.children.iter().rev());
        }
        None
    }
}

/// Parse a whole document into its root element
pub fn parse(xml: &str) -> Result<Element, XmlError> {
    let mut reader = NsReader::from_str(xml);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (ns, event) = match reader.read_resolved_event() {
            Ok((ns, event)) => (namespace_of(&ns), event),
            Err(e) => {
                return Err(XmlError::Syntax {
                    position: reader.buffer_position() as u64,
                    message: e.to_string(),
                });
            }
        };

        match event {
            Event::Start(e) => {
                stack.push(Element {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).to_string(),
                    namespace: ns,
                    ..Default::default()
                });
            }
            Event::Empty(e) => {
                let element = Element {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).to_string(),
                    namespace: ns,
                    ..Default::default()
                };
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                if let Some(mut element) = stack.pop() {
                    element.text = element.text.trim().to_string();
                    attach(&mut stack, &mut root, element);
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|err| XmlError::Syntax {
                    position: reader.buffer_position() as u64,
                    message: err.to_string(),
                })?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(XmlError::Empty)
}

fn namespace_of(ns: &ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(namespace) => {
            Some(String::from_utf8_lossy(namespace.0).to_string())
        }
        _ => None,
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Escape a value for interpolation into element text
pub fn escape(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}
