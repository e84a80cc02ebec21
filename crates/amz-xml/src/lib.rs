//! Normalization of Amazon's XML responses.
//!
//! Amazon hangs a different default namespace off every endpoint, so
//! all namespace traces are stripped textually before parsing and the
//! resulting tree is queried with simple path selectors that never
//! mention a namespace.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

mod path;

static RE_NS_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i) xmlns(:\w*)?="[^"]*""#).unwrap());
static RE_NS_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\w+:").unwrap());
static RE_NS_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/\w+:").unwrap());

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("malformed XML attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("document has no root element")]
    NoRoot,
}

/// Remove all traces of namespaces from an XML document: the xmlns
/// declarations themselves, then prefixes in opening tags, then
/// prefixes in closing and self-closing positions. Order matters.
pub fn strip_namespaces(xml: &str) -> String {
    let xml = RE_NS_DECL.replace_all(xml, "");
    let xml = RE_NS_OPEN.replace_all(&xml, "<");
    let xml = RE_NS_CLOSE.replace_all(&xml, "/");
    xml.into_owned()
}

/// One element of the parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Node>,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find_map(|(key, value)| if key == name { Some(value.as_str()) } else { None })
    }

    /// First node matching `path`, evaluated with this node as the
    /// context. Supported forms: `/A/B` (anchored at this node),
    /// `./A/B` or `A/B` (children), `.//A` (descendants), `//A`
    /// (this node or descendants); `//` may also appear between
    /// segments. Matches are returned in document order.
    pub fn find(&self, path: &str) -> Option<&Node> {
        path::find(self, path)
    }

    /// The text of the first node matching `path`, if that node has
    /// any text.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.find(path).and_then(|node| node.text.as_deref())
    }

    /// The text of the first node matching `path`, parsed as `T`.
    /// Missing node, missing text and parse failures all yield `None`.
    pub fn value_at<T: FromStr>(&self, path: &str) -> Option<T> {
        self.text_at(path).and_then(|text| text.parse().ok())
    }

    /// Every descendant named `name`, in document order. Does not
    /// include this node.
    pub fn descendants(&self, name: &str) -> Vec<&Node> {
        let mut found = Vec::new();
        for child in &self.children {
            child.collect_descendants(name, &mut found);
        }
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Node>) {
        if self.name == name {
            found.push(self);
        }
        for child in &self.children {
            child.collect_descendants(name, found);
        }
    }
}

/// A parsed, namespace-free Amazon response.
#[derive(Debug)]
pub struct AmzXmlResponse {
    root: Node,
}

impl AmzXmlResponse {
    /// Strip namespaces and parse. Malformed XML is an error, never an
    /// empty tree.
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let sanitized = strip_namespaces(xml);
        let root = parse_tree(&sanitized)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// The error code if this response is an Amazon error envelope.
    pub fn error_code(&self) -> Option<&str> {
        self.root.text_at("/ErrorResponse/Error/Code")
    }

    pub fn error_message(&self) -> Option<&str> {
        self.root.text_at("/ErrorResponse/Error/Message")
    }

    pub fn request_id(&self) -> Option<&str> {
        self.root.text_at("//RequestID")
    }

    /// The error envelope as a JSON record.
    pub fn error_as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.error_code(),
                "message": self.error_message(),
                "request_id": self.request_id(),
            }
        })
    }
}

fn node_from_start(start: &BytesStart) -> Result<Node, XmlError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut node = Node::new(name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn append_text(node: &mut Node, text: &str) {
    if text.is_empty() {
        return;
    }
    match &mut node.text {
        Some(existing) => existing.push_str(text),
        None => node.text = Some(text.to_string()),
    }
}

fn parse_tree(xml: &str) -> Result<Node, XmlError> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text_start = true;
    config.trim_text_end = true;

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(node_from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    append_text(top, &text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    append_text(top, &String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(XmlError::NoRoot)
}

fn attach(stack: &mut Vec<Node>, root: &mut Option<Node>, node: Node) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}
