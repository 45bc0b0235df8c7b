//! Document-level helpers: stylesheet source discovery, `<style>` rewriting, post passes and
//! serialization.

use crate::declaration::parse_style_attribute;
use crate::error::InlinerError;
use crate::xml;
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Marker attribute; `ignore` leaves the element out of inlining.
pub const IGNORE_ATTRIBUTE: &str = "data-css-inliner";

pub fn parse_document(html: &str) -> Result<NodeRef, InlinerError> {
    if html.trim().is_empty() {
        return Err(InlinerError::MalformedDocument(
            "document is empty".to_string(),
        ));
    }
    Ok(kuchiki::parse_html().one(html))
}

pub fn serialize_document(document: &NodeRef) -> Result<String, InlinerError> {
    let mut out = Vec::new();
    document.serialize(&mut out)?;
    String::from_utf8(out).map_err(|err| {
        InlinerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}

/// How the input is parsed and the result written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMethod {
    #[default]
    Html,
    Xml,
}

impl OutputMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMethod::Html => "html",
            OutputMethod::Xml => "xml",
        }
    }

    pub fn parse(&self, text: &str) -> Result<NodeRef, InlinerError> {
        match self {
            OutputMethod::Html => parse_document(text),
            OutputMethod::Xml if text.trim().is_empty() => Err(InlinerError::MalformedDocument(
                "document is empty".to_string(),
            )),
            OutputMethod::Xml => xml::parse_xml_document(text),
        }
    }

    pub fn serialize(&self, document: &NodeRef) -> Result<String, InlinerError> {
        match self {
            OutputMethod::Html => serialize_document(document),
            OutputMethod::Xml => Ok(xml::serialize_xml_document(document)),
        }
    }

    /// Text for a `<style>` element holding `css`; CDATA-wrapped for XML.
    pub fn style_text(&self, css: &str) -> String {
        match self {
            OutputMethod::Html => css.to_string(),
            OutputMethod::Xml => xml::wrap_cdata(css),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Style,
    Link,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Style => "style",
            SourceKind::Link => "link",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StylesheetSource {
    pub node: NodeRef,
    pub kind: SourceKind,
    /// `href` for links.
    pub href: Option<String>,
}

fn nested_in_svg(node: &NodeRef) -> bool {
    node.ancestors().any(|ancestor| {
        if let NodeData::Element(el) = ancestor.data() {
            el.name.local.as_ref().eq_ignore_ascii_case("svg")
        } else {
            false
        }
    })
}

fn accepts_media(media: Option<&str>) -> bool {
    match media {
        None => true,
        Some(media) => media.trim().eq_ignore_ascii_case("screen"),
    }
}

/// `<style>` and `<link rel="stylesheet">` elements in document order that should be inlined.
pub fn collect_sources(document: &NodeRef) -> Vec<StylesheetSource> {
    let mut sources = Vec::new();
    let Ok(candidates) = document.select("style, link") else {
        return sources;
    };
    for candidate in candidates {
        let node = candidate.as_node().clone();
        let is_style = candidate.name.local.as_ref().eq_ignore_ascii_case("style");
        let mut attrs = candidate.attributes.borrow_mut();

        let href = if is_style {
            None
        } else {
            let rel = attrs.get("rel").unwrap_or("").to_ascii_lowercase();
            if !rel.split_ascii_whitespace().any(|token| token == "stylesheet") {
                continue;
            }
            match attrs.get("href") {
                Some(href) if !href.trim().is_empty() => Some(href.trim().to_string()),
                _ => continue,
            }
        };
        if is_style && nested_in_svg(&node) {
            continue;
        }
        if let Some(marker) = attrs.get(IGNORE_ATTRIBUTE).map(str::to_string) {
            if marker.trim().eq_ignore_ascii_case("ignore") {
                attrs.remove(IGNORE_ATTRIBUTE);
                continue;
            }
            log::warn!("unrecognized {IGNORE_ATTRIBUTE} value {marker:?}");
        }
        if !accepts_media(attrs.get("media")) {
            continue;
        }
        sources.push(StylesheetSource {
            node,
            kind: if is_style {
                SourceKind::Style
            } else {
                SourceKind::Link
            },
            href,
        });
    }
    sources
}

/// Detached `<style type="text/css">` holding `css`.
pub fn new_style_element(css: &str) -> Result<NodeRef, InlinerError> {
    let scratch = kuchiki::parse_html().one("<style type=\"text/css\"></style>");
    let style = scratch.select_first("style").map_err(|()| {
        InlinerError::MalformedDocument("could not create a style element".to_string())
    })?;
    let node = style.as_node().clone();
    node.detach();
    node.append(NodeRef::new_text(css));
    Ok(node)
}

pub fn set_text(node: &NodeRef, text: &str) {
    let children: Vec<NodeRef> = node.children().collect();
    for child in children {
        child.detach();
    }
    node.append(NodeRef::new_text(text));
}

pub fn replace_with_style(node: &NodeRef, css: &str) -> Result<(), InlinerError> {
    let style = new_style_element(css)?;
    node.insert_before(style);
    node.detach();
    Ok(())
}

/// What happens to a processed `<style>`/`<link>` once its rules are read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceAction {
    Keep,
    Remove,
    SetText(String),
    ReplaceWithStyle(String),
}

pub fn apply_source_action(node: &NodeRef, action: SourceAction) -> Result<(), InlinerError> {
    match action {
        SourceAction::Keep => {}
        SourceAction::Remove => node.detach(),
        SourceAction::SetText(css) => set_text(node, &css),
        SourceAction::ReplaceWithStyle(css) => replace_with_style(node, &css)?,
    }
    Ok(())
}

/// Appends a `<style>` to `<head>`, or to the document root if there is none.
pub fn append_head_style(document: &NodeRef, css: &str) -> Result<(), InlinerError> {
    let style = new_style_element(css)?;
    match document.select_first("head") {
        Ok(head) => head.as_node().append(style),
        Err(()) => document.append(style),
    }
    Ok(())
}

pub fn remove_classes(document: &NodeRef) -> usize {
    let Ok(elements) = document.select("[class]") else {
        return 0;
    };
    let mut removed = 0usize;
    for element in elements {
        if element.attributes.borrow_mut().remove("class").is_some() {
            removed += 1;
        }
    }
    removed
}

/// Gives `<img>` elements floated left/right a matching `align` attribute.
pub fn align_floating_images(document: &NodeRef) -> usize {
    let Ok(images) = document.select("img[style]") else {
        return 0;
    };
    let mut aligned = 0usize;
    for image in images {
        let mut attrs = image.attributes.borrow_mut();
        let style = attrs.get("style").unwrap_or("").to_string();
        let float = parse_style_attribute(&style)
            .into_iter()
            .filter(|(suffix, _)| suffix.is_empty())
            .flat_map(|(_, declarations)| declarations)
            .filter(|declaration| declaration.property == "float")
            .last()
            .map(|declaration| declaration.value.to_ascii_lowercase());
        if let Some(side @ ("left" | "right")) = float.as_deref() {
            attrs.insert("align", side.to_string());
            aligned += 1;
        }
    }
    aligned
}

fn float_margin_pattern() -> &'static Regex {
    static FLOAT_MARGIN: OnceLock<Regex> = OnceLock::new();
    FLOAT_MARGIN.get_or_init(|| {
        Regex::new(r"(?i)(^|[;{\s])(margin(?:-(?:top|bottom|left|right))?|float)(\s*:)")
            .expect("float/margin regex compiles")
    })
}

/// `margin:0; float:left` becomes `Margin:0; Float:left`. Outlook.com drops lowercase ones.
pub fn capitalize_float_margin_text(style: &str) -> String {
    float_margin_pattern()
        .replace_all(style, |caps: &Captures<'_>| {
            let property = &caps[2];
            let mut capitalized = String::with_capacity(property.len());
            let mut chars = property.chars();
            if let Some(first) = chars.next() {
                capitalized.push(first.to_ascii_uppercase());
            }
            capitalized.push_str(&chars.as_str().to_ascii_lowercase());
            format!("{}{}{}", &caps[1], capitalized, &caps[3])
        })
        .into_owned()
}

pub fn capitalize_float_margin(document: &NodeRef) -> usize {
    let Ok(elements) = document.select("[style]") else {
        return 0;
    };
    let mut changed = 0usize;
    for element in elements {
        let mut attrs = element.attributes.borrow_mut();
        let Some(style) = attrs.get("style").map(str::to_string) else {
            continue;
        };
        let rewritten = capitalize_float_margin_text(&style);
        if rewritten != style {
            attrs.insert("style", rewritten);
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html_of(document: &NodeRef) -> String {
        serialize_document(document).expect("serialize")
    }

    #[test]
    fn rejects_blank_documents() {
        let err = parse_document("  \n ").expect_err("blank");
        assert!(matches!(err, InlinerError::MalformedDocument(_)));
    }

    #[test]
    fn output_method_dispatches_parse_and_style_text() {
        assert!(matches!(
            OutputMethod::Xml.parse("<p>x"),
            Err(InlinerError::Xml(_))
        ));
        assert!(OutputMethod::Html.parse("<p>x").is_ok());
        assert_eq!(OutputMethod::Html.style_text("a{}"), "a{}");
        assert_eq!(
            OutputMethod::Xml.style_text("a{}"),
            "/*<![CDATA[*/a{}/*]]>*/"
        );
        let document = OutputMethod::Xml.parse("<p><br/></p>").expect("well-formed");
        assert_eq!(
            OutputMethod::Xml.serialize(&document).expect("serialize"),
            "<p><br/></p>"
        );
    }

    #[test]
    fn collects_sources_in_document_order() {
        let document = parse_document(
            r#"<html><head>
            <link rel="stylesheet" href="a.css">
            <style>h1 { color: red }</style>
            <link rel="icon" href="favicon.ico">
            <style media="print">h1 { color: black }</style>
            <style media="screen">p { margin: 0 }</style>
            </head><body>
            <svg><style>circle { fill: red }</style></svg>
            <style data-css-inliner="ignore">b { color: red }</style>
            </body></html>"#,
        )
        .expect("parse");
        let sources = collect_sources(&document);
        let kinds: Vec<&str> = sources.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec!["link", "style", "style"]);
        assert_eq!(sources[0].href.as_deref(), Some("a.css"));
        assert!(sources[2].node.text_contents().contains("margin"));

        let html = html_of(&document);
        assert!(!html.contains(IGNORE_ATTRIBUTE), "{html}");
        assert!(html.contains("b { color: red }"), "{html}");
    }

    #[test]
    fn replaces_and_appends_style_elements() {
        let document = parse_document(
            r#"<html><head><link rel="stylesheet" href="a.css"></head><body></body></html>"#,
        )
        .expect("parse");
        let link = document.select_first("link").expect("link");
        replace_with_style(link.as_node(), "a:hover {color:red !important}").expect("replace");
        append_head_style(&document, "@font-face {font-family: X}").expect("append");
        let html = html_of(&document);
        assert!(!html.contains("<link"), "{html}");
        assert!(
            html.contains(
                r#"<style type="text/css">a:hover {color:red !important}</style><style type="text/css">@font-face {font-family: X}</style></head>"#
            ),
            "{html}"
        );
    }

    #[test]
    fn set_text_replaces_children() {
        let document = parse_document("<style>h1 { color: red }</style>").expect("parse");
        let style = document.select_first("style").expect("style");
        set_text(style.as_node(), "p {margin:0 !important}");
        assert_eq!(style.as_node().text_contents(), "p {margin:0 !important}");
    }

    #[test]
    fn removes_class_attributes() {
        let document =
            parse_document(r#"<p class="a">x</p><div class="b c">y</div>"#).expect("parse");
        assert_eq!(remove_classes(&document), 2);
        assert!(!html_of(&document).contains("class="));
    }

    #[test]
    fn aligns_floating_images() {
        let document = parse_document(
            r#"<img src="a.png" style="float: Right; width: 10px"><img src="b.png" style="float:none">"#,
        )
        .expect("parse");
        assert_eq!(align_floating_images(&document), 1);
        let first = document.select_first("img").expect("img");
        assert_eq!(first.attributes.borrow().get("align"), Some("right"));
    }

    #[test]
    fn capitalizes_float_and_margin() {
        assert_eq!(
            capitalize_float_margin_text(
                "margin:0; float:left; margin-top: 2px; color:red; padding-margin:1px"
            ),
            "Margin:0; Float:left; Margin-top: 2px; color:red; padding-margin:1px"
        );
        assert_eq!(
            capitalize_float_margin_text("{margin:0} :hover{float:none}"),
            "{Margin:0} :hover{Float:none}"
        );
    }
}
