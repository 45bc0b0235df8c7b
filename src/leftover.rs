use crate::cache::StylesheetCache;
use crate::declaration::Declaration;
use crate::partition::Leftover;
use crate::sheet::{CssRule, MediaRule};

fn important_block(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(|declaration| format!("{}:{} !important", declaration.property, declaration.value))
        .collect::<Vec<_>>()
        .join(";")
}

fn write_rules(rules: &[CssRule], cache: &StylesheetCache, out: &mut Vec<String>) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                let declarations = cache.declarations(&style.block);
                if !declarations.is_empty() {
                    out.push(format!("{} {{{}}}", style.selectors, important_block(&declarations)));
                }
            }
            CssRule::Media(media) => out.push(media_to_css(media, cache)),
            CssRule::Unknown(unknown) => out.push(unknown.to_css()),
        }
    }
}

fn media_to_css(media: &MediaRule, cache: &StylesheetCache) -> String {
    let mut inner = Vec::new();
    let has_style_rules = media
        .rules
        .iter()
        .any(|rule| matches!(rule, CssRule::Style(_)));
    if has_style_rules {
        write_rules(&media.rules, cache, &mut inner);
    } else if !media.block.is_empty() {
        inner.push(media.block.clone());
    }
    let mut out = format!("@media {} {{\n", media.query);
    for line in inner {
        out.push_str(&line);
        out.push('\n');
    }
    out.push('}');
    out
}

/// Leftover rules as stylesheet text, every declaration marked `!important`.
pub fn leftover_to_css(items: &[Leftover], cache: &StylesheetCache) -> String {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Leftover::Selector {
                selector,
                declarations,
            } => lines.push(format!("{} {{{}}}", selector, important_block(declarations))),
            Leftover::Media(media) => lines.push(media_to_css(media, cache)),
            Leftover::Unknown(unknown) => lines.push(unknown.to_css()),
        }
    }
    lines.join("\n")
}
