//! XML documents.
//!
//! roxmltree checks well-formedness; the parsed tree is copied into kuchiki so selector matching
//! and style writing work the same way as for HTML. Names are stored with their prefix and no
//! namespace, and `xmlns` declarations become plain attributes, which keeps the output close to
//! the input.

use crate::error::InlinerError;
use html5ever::{LocalName, Namespace, QualName};
use kuchiki::{Attribute, ExpandedName, NodeData, NodeRef};

const CDATA_OPEN: &str = "/*<![CDATA[*/";
const CDATA_CLOSE: &str = "/*]]>*/";

/// `/*<![CDATA[*/css/*]]>*/`
pub fn wrap_cdata(css: &str) -> String {
    format!("{CDATA_OPEN}{css}{CDATA_CLOSE}")
}

fn is_cdata_wrapped(text: &str) -> bool {
    text.starts_with(CDATA_OPEN) && text.ends_with(CDATA_CLOSE)
}

fn prefixed(prefix: Option<&str>, local: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{local}"),
        _ => local.to_string(),
    }
}

fn attribute(name: &str, value: String) -> (ExpandedName, Attribute) {
    (
        ExpandedName::new(Namespace::from(""), LocalName::from(name)),
        Attribute {
            prefix: None,
            value,
        },
    )
}

/// Namespaces declared on `node` itself rather than inherited from its parent.
fn declared_namespaces(node: roxmltree::Node<'_, '_>) -> Vec<(String, String)> {
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    node.namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| {
            let name = match ns.name() {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            (name, ns.uri().to_string())
        })
        .collect()
}

fn convert(node: roxmltree::Node<'_, '_>) -> Option<NodeRef> {
    match node.node_type() {
        roxmltree::NodeType::Element => {
            let tag = node.tag_name();
            let prefix = tag.namespace().and_then(|uri| node.lookup_prefix(uri));
            let name = QualName::new(
                None,
                Namespace::from(""),
                LocalName::from(prefixed(prefix, tag.name()).as_str()),
            );
            let mut attributes: Vec<(ExpandedName, Attribute)> = declared_namespaces(node)
                .into_iter()
                .map(|(name, uri)| attribute(&name, uri))
                .collect();
            for attr in node.attributes() {
                let prefix = attr.namespace().and_then(|uri| node.lookup_prefix(uri));
                attributes.push(attribute(
                    &prefixed(prefix, attr.name()),
                    attr.value().to_string(),
                ));
            }
            let element = NodeRef::new_element(name, attributes);
            for child in node.children() {
                if let Some(converted) = convert(child) {
                    element.append(converted);
                }
            }
            Some(element)
        }
        roxmltree::NodeType::Text => node.text().map(NodeRef::new_text),
        roxmltree::NodeType::Comment => node.text().map(NodeRef::new_comment),
        roxmltree::NodeType::PI => node
            .pi()
            .map(|pi| NodeRef::new_processing_instruction(pi.target, pi.value.unwrap_or(""))),
        roxmltree::NodeType::Root => None,
    }
}

/// Parses `xml`, returning roxmltree's error unchanged when it is not well-formed.
pub fn parse_xml_document(xml: &str) -> Result<NodeRef, InlinerError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let parsed = roxmltree::Document::parse_with_options(xml, options).map_err(InlinerError::Xml)?;
    let document = NodeRef::new_document();
    for child in parsed.root().children() {
        if let Some(node) = convert(child) {
            document.append(node);
        }
    }
    Ok(document)
}

pub fn serialize_xml_document(document: &NodeRef) -> String {
    let mut out = String::new();
    for child in document.children() {
        write_xml(&child, &mut out);
    }
    out
}

fn write_xml(node: &NodeRef, out: &mut String) {
    match node.data() {
        NodeData::Element(el) => {
            let tag = el.name.local.as_ref();
            out.push('<');
            out.push_str(tag);
            for (name, attr) in el.attributes.borrow().map.iter() {
                out.push(' ');
                if let Some(prefix) = &attr.prefix {
                    out.push_str(prefix.as_ref());
                    out.push(':');
                }
                out.push_str(name.local.as_ref());
                out.push_str("=\"");
                escape_xml_attr(&attr.value, out);
                out.push('"');
            }
            if node.first_child().is_none() {
                out.push_str("/>");
                return;
            }
            out.push('>');

            let style = tag.eq_ignore_ascii_case("style");
            for child in node.children() {
                match child.as_text() {
                    Some(text) if style && is_cdata_wrapped(&text.borrow()) => {
                        out.push_str(&text.borrow());
                    }
                    _ => write_xml(&child, out),
                }
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        NodeData::Text(text) => escape_xml_text(&text.borrow(), out),
        NodeData::Comment(comment) => {
            out.push_str("<!--");
            out.push_str(&comment.borrow());
            out.push_str("-->");
        }
        NodeData::ProcessingInstruction(pi) => {
            let pi = pi.borrow();
            out.push_str("<?");
            out.push_str(&pi.0);
            if !pi.1.is_empty() {
                out.push(' ');
                out.push_str(&pi.1);
            }
            out.push_str("?>");
        }
        NodeData::Document(_) | NodeData::DocumentFragment => {
            for child in node.children() {
                write_xml(&child, out);
            }
        }
        NodeData::Doctype(_) => {}
    }
}

fn escape_xml_attr(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

fn escape_xml_text(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}
