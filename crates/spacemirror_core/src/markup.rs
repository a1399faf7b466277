//! Tolerant HTML fragment tree.
//!
//! Page bodies are parsed once into an owned [`Element`] tree and every
//! rewrite produces a new tree. The parser accepts the loose HTML that
//! Confluence renders: void elements without a closing slash, stray end tags,
//! named entities and attributes without values.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::resolve_html5_entity;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use tracing::warn;

const ROOT_TAG: &str = "root";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// A complete `script` or `style` element. Its body is never tokenized.
static RAW_TEXT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)(?P<script><script\b[^>]*>)(?P<script_body>.*?)</script\s*>|(?P<style><style\b[^>]*>)(?P<style_body>.*?)</style\s*>",
    )
    .expect("invalid raw text regex")
});

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);")
        .expect("invalid reference regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    /// Attributes in source order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Replace the value of `name` in place, or append it when absent.
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
        self
    }

    pub fn without_attr(mut self, name: &str) -> Self {
        self.attrs.retain(|(key, _)| key != name);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn is_void(&self) -> bool {
        is_void(&self.tag)
    }

    /// Rebuild every descendant bottom-up through `pass`.
    ///
    /// `pass` receives each element after its own children were rebuilt and
    /// returns the node to put in its place, or `None` to drop it. `self` is
    /// never handed to `pass`.
    pub fn rewrite<F>(&self, pass: &F) -> Element
    where
        F: Fn(Element) -> Option<Node>,
    {
        let children = self
            .children
            .iter()
            .filter_map(|child| match child {
                Node::Text(text) => Some(Node::Text(text.clone())),
                Node::Element(element) => pass(element.rewrite(pass)),
            })
            .collect();
        Element {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            children,
        }
    }

    /// Serialize the children only. Used for the synthetic fragment root.
    pub fn inner_html(&self) -> String {
        let mut out = String::with_capacity(1024);
        let raw = RAW_TEXT_ELEMENTS.contains(&self.tag.as_str());
        for child in &self.children {
            write_node(child, raw, &mut out);
        }
        out
    }
}

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Parse an HTML fragment into a synthetic root element.
///
/// Never fails. `script` and `style` bodies are kept verbatim; everything
/// else goes through the reader, and a reader error drops the rest of that
/// stretch of markup only.
pub fn parse_fragment(html: &str) -> Element {
    // stack[0] is the fragment root.
    let mut stack: Vec<Element> = vec![Element::new(ROOT_TAG)];
    let mut rest = 0;

    for caps in RAW_TEXT_PATTERN.captures_iter(html) {
        let (Some(whole), Some(open), Some(body)) = (
            caps.get(0),
            caps.name("script").or_else(|| caps.name("style")),
            caps.name("script_body").or_else(|| caps.name("style_body")),
        ) else {
            continue;
        };
        tokenize(&html[rest..whole.start()], &mut stack);
        let depth = stack.len();
        tokenize(open.as_str(), &mut stack);
        if stack.len() > depth {
            append_text(&mut stack, body.as_str());
            close_top(&mut stack);
        } else if let Some(Node::Element(raw)) = stack
            .last_mut()
            .and_then(|parent| parent.children.last_mut())
            .filter(|_| !body.as_str().is_empty())
        {
            // `<script/>` still owns the text up to its end tag.
            raw.children.push(Node::Text(body.as_str().to_string()));
        }
        rest = whole.end();
    }
    tokenize(&html[rest..], &mut stack);

    while stack.len() > 1 {
        close_top(&mut stack);
    }
    stack.pop().unwrap_or_else(|| Element::new(ROOT_TAG))
}

fn tokenize(markup: &str, stack: &mut Vec<Element>) {
    if markup.is_empty() {
        return;
    }
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    config.allow_dangling_amp = true;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let element = element_from_start(&start);
                if element.is_void() {
                    append_node(stack, Node::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Ok(Event::Empty(start)) => {
                append_node(stack, Node::Element(element_from_start(&start)));
            }
            Ok(Event::End(end)) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).to_ascii_lowercase();
                close_until(stack, &name);
            }
            Ok(Event::Text(text)) => {
                let decoded = reader
                    .decoder()
                    .decode(&text)
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                append_text(stack, &decoded);
            }
            Ok(Event::GeneralRef(reference)) => {
                let entity = String::from_utf8_lossy(&reference).into_owned();
                append_text(stack, &decode_reference(&entity));
            }
            Ok(Event::CData(data)) => {
                append_text(stack, &String::from_utf8_lossy(&data));
            }
            Ok(Event::Eof) => break,
            Ok(Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_)) => {}
            Err(error) => {
                warn!(
                    position = reader.error_position(),
                    "malformed markup, keeping what was parsed: {error}"
                );
                break;
            }
        }
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Element {
    let tag = String::from_utf8_lossy(start.name().as_ref()).to_ascii_lowercase();
    let mut element = Element::new(tag);
    for attr in start.html_attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = unescape_lenient(&String::from_utf8_lossy(&attr.value));
        element.attrs.push((key, value));
    }
    element
}

fn append_node(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

fn append_text(stack: &mut [Element], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(parent) = stack.last_mut() else {
        return;
    };
    if let Some(Node::Text(previous)) = parent.children.last_mut() {
        previous.push_str(text);
    } else {
        parent.children.push(Node::Text(text.to_string()));
    }
}

/// Close open elements up to and including the innermost `name`.
/// End tags with no matching open element are ignored.
fn close_until(stack: &mut Vec<Element>, name: &str) {
    let Some(position) = stack.iter().skip(1).rposition(|open| open.tag == name) else {
        return;
    };
    let target = position + 1;
    while stack.len() > target {
        close_top(stack);
    }
}

fn close_top(stack: &mut Vec<Element>) {
    if stack.len() <= 1 {
        return;
    }
    if let Some(done) = stack.pop() {
        append_node(stack, Node::Element(done));
    }
}

/// Resolve one character or entity reference given without `&` and `;`.
/// Anything unknown comes back as written.
fn decode_reference(entity: &str) -> String {
    let resolved = match entity.strip_prefix('#') {
        Some(number) => {
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => number.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32).map(String::from)
        }
        None => resolve_html5_entity(entity).map(String::from),
    };
    resolved.unwrap_or_else(|| format!("&{entity};"))
}

/// Decode every reference in `raw` on its own. Unknown names and bare `&`
/// stay literal.
fn unescape_lenient(raw: &str) -> String {
    REFERENCE_PATTERN
        .replace_all(raw, |caps: &regex::Captures| decode_reference(&caps[1]))
        .into_owned()
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_node(node: &Node, raw_text: bool, out: &mut String) {
    match node {
        Node::Text(text) if raw_text => out.push_str(text),
        Node::Text(text) => out.push_str(&escape_text(text)),
        Node::Element(element) => write_element(element, out),
    }
}

fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for (key, value) in &element.attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');
    if element.is_void() {
        return;
    }
    let raw = RAW_TEXT_ELEMENTS.contains(&element.tag.as_str());
    for child in &element.children {
        write_node(child, raw, out);
    }
    out.push_str("</");
    out.push_str(&element.tag);
    out.push('>');
}
