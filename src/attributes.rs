//! Legacy presentation attributes (`align`, `bgcolor`, ...) derived from inlined styles.

use kuchiki::ElementData;
use std::collections::BTreeSet;

/// `#abc` becomes `#aabbcc`; anything else is returned unchanged.
pub fn six_color(value: &str) -> String {
    let hex = match value.strip_prefix('#') {
        Some(hex) if hex.len() == 3 && hex.chars().all(|c| c.is_ascii_hexdigit()) => hex,
        _ => return value.to_string(),
    };
    let mut out = String::with_capacity(7);
    out.push('#');
    for ch in hex.chars() {
        out.push(ch);
        out.push(ch);
    }
    out
}

fn strip_px(value: &str) -> String {
    value
        .strip_suffix("px")
        .unwrap_or(value)
        .trim_end()
        .to_string()
}

/// Attribute/value pairs implied by a plain declaration list, in declaration order.
pub fn legacy_attributes<'a>(
    declarations: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<(&'static str, String)> {
    let mut out: Vec<(&'static str, String)> = Vec::new();
    for (property, value) in declarations {
        let value = value.trim();
        let mapped = match property {
            "text-align" => Some(("align", value.to_string())),
            "vertical-align" => Some(("valign", value.to_string())),
            "background-color" if !value.to_ascii_lowercase().contains("transparent") => {
                Some(("bgcolor", six_color(value)))
            }
            "width" => Some(("width", strip_px(value))),
            "height" => Some(("height", strip_px(value))),
            _ => None,
        };
        if let Some((name, value)) = mapped {
            match out.iter_mut().find(|(existing, _)| *existing == name) {
                Some((_, slot)) => *slot = value,
                None => out.push((name, value)),
            }
        }
    }
    out
}

/// Writes the pairs onto `element`. Existing attributes survive unless `force`; disabled names
/// are never written. Returns how many attributes were set.
pub fn apply_legacy_attributes(
    element: &ElementData,
    pairs: &[(&'static str, String)],
    force: bool,
    disabled: &BTreeSet<String>,
) -> usize {
    let mut attrs = element.attributes.borrow_mut();
    let mut written = 0usize;
    for (name, value) in pairs {
        if disabled.contains(*name) || (!force && attrs.contains(*name)) {
            continue;
        }
        attrs.insert(*name, value.clone());
        written += 1;
    }
    written
}
