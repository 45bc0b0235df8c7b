//! Splits a stylesheet into rules that can be inlined and rules that must stay in a `<style>`.

use crate::cache::StylesheetCache;
use crate::declaration::Declaration;
use crate::sheet::{CssRule, MediaRule, Stylesheet, UnknownRule};
use crate::specificity::Specificity;

/// Pseudo-classes that only narrow which elements match.
const STRUCTURAL_PSEUDO_CLASSES: &[&str] = &["first-child", "last-child", "nth-child"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOptions {
    pub exclude_pseudoclasses: bool,
    pub include_star_selectors: bool,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            exclude_pseudoclasses: true,
            include_star_selectors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinableRule {
    /// Selector as written, pseudo suffix included.
    pub selector: String,
    /// Selector handed to the matcher.
    pub match_selector: String,
    pub pseudo_suffix: String,
    pub declarations: Vec<Declaration>,
    pub specificity: Specificity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leftover {
    Selector {
        selector: String,
        declarations: Vec<Declaration>,
    },
    Media(MediaRule),
    Unknown(UnknownRule),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub inlinable: Vec<InlinableRule>,
    pub leftover: Vec<Leftover>,
}

/// Splits on commas outside parentheses, brackets and strings.
pub fn split_selectors(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (idx, ch) in list.char_indices() {
        match (quote, ch) {
            (Some(open), c) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(list[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(list[start..].trim());
    parts
}

fn pseudo_name(rest: &str) -> &str {
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// Byte offset of the first pseudo-class that is not structural, if any.
pub fn pseudo_start(selector: &str) -> Option<usize> {
    let bytes = selector.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut idx = 0usize;
    while idx < bytes.len() {
        let byte = bytes[idx];
        match (quote, byte) {
            (Some(open), b) if b == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'[') => depth += 1,
            (None, b']') => depth = depth.saturating_sub(1),
            (None, b':') if depth == 0 => {
                if bytes.get(idx + 1) == Some(&b':') {
                    return Some(idx);
                }
                let name = pseudo_name(&selector[idx + 1..]);
                let structural = STRUCTURAL_PSEUDO_CLASSES
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(name));
                if !structural {
                    return Some(idx);
                }
                idx += name.len();
            }
            _ => {}
        }
        idx += 1;
    }
    None
}

pub fn partition_stylesheet(
    sheet: &Stylesheet,
    sheet_index: u32,
    options: PartitionOptions,
    cache: &StylesheetCache,
) -> Partition {
    let mut out = Partition::default();
    let mut rule_index = 0u32;
    for rule in &sheet.rules {
        match rule {
            CssRule::Media(media) => out.leftover.push(Leftover::Media(media.clone())),
            CssRule::Unknown(unknown) => out.leftover.push(Leftover::Unknown(unknown.clone())),
            CssRule::Style(style) => {
                let declarations = cache.declarations(&style.block);
                if declarations.is_empty() {
                    continue;
                }
                let (important, normal): (Vec<Declaration>, Vec<Declaration>) = declarations
                    .iter()
                    .cloned()
                    .partition(|declaration| declaration.important);

                for selector in split_selectors(&style.selectors) {
                    if selector.is_empty() || selector.starts_with('@') {
                        continue;
                    }
                    let pseudo = pseudo_start(selector);
                    if pseudo.is_some() && options.exclude_pseudoclasses {
                        out.leftover.push(Leftover::Selector {
                            selector: selector.to_string(),
                            declarations: declarations.to_vec(),
                        });
                        continue;
                    }
                    if selector.contains('*') && !options.include_star_selectors {
                        continue;
                    }
                    if selector.starts_with(':') {
                        continue;
                    }
                    let (match_selector, pseudo_suffix) = match pseudo {
                        Some(at) => (selector[..at].trim_end(), &selector[at..]),
                        None => (selector, ""),
                    };
                    for (group, is_important) in [(&important, true), (&normal, false)] {
                        if group.is_empty() {
                            continue;
                        }
                        out.inlinable.push(InlinableRule {
                            selector: selector.to_string(),
                            match_selector: match_selector.to_string(),
                            pseudo_suffix: pseudo_suffix.to_string(),
                            declarations: group.clone(),
                            specificity: Specificity::from_selector(
                                selector,
                                is_important,
                                sheet_index,
                                rule_index,
                            ),
                        });
                        rule_index = rule_index.saturating_add(1);
                    }
                }
            }
        }
    }
    out
}

/// Stable ascending sort: later entries win on shared properties.
pub fn rank_rules(rules: &mut [InlinableRule]) {
    rules.sort_by(|a, b| a.specificity.cmp(&b.specificity));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::{Validation, parse_stylesheet};

    fn partition(css: &str, options: PartitionOptions) -> Partition {
        let sheet = parse_stylesheet(css, Validation::Off).expect("lenient parse");
        partition_stylesheet(&sheet, 0, options, &StylesheetCache::disabled())
    }

    fn inline_options() -> PartitionOptions {
        PartitionOptions {
            exclude_pseudoclasses: false,
            include_star_selectors: false,
        }
    }

    #[test]
    fn splits_selector_lists_at_top_level() {
        assert_eq!(
            split_selectors("h1, p:nth-child(2n, 1), a[title=\"x,y\"]"),
            vec!["h1", "p:nth-child(2n, 1)", "a[title=\"x,y\"]"]
        );
    }

    #[test]
    fn finds_stateful_pseudo_classes() {
        assert_eq!(pseudo_start("a:hover"), Some(1));
        assert_eq!(pseudo_start("li:first-child"), None);
        assert_eq!(pseudo_start("li:nth-child(2n+1)"), None);
        assert_eq!(pseudo_start("li:first-child a:hover"), Some(16));
        assert_eq!(pseudo_start("p::first-letter"), Some(1));
        assert_eq!(pseudo_start("a[href=\"x:y\"]"), None);
    }

    #[test]
    fn splits_important_into_sibling_rule() {
        let out = partition("p { color: red !important; font-size: 2px }", inline_options());
        assert_eq!(out.inlinable.len(), 2);
        assert!(out.inlinable[0].specificity.important);
        assert_eq!(out.inlinable[0].declarations[0].property, "color");
        assert!(!out.inlinable[1].specificity.important);
        assert_eq!(out.inlinable[1].declarations[0].property, "font-size");
        assert!(out.inlinable[0].specificity.rule < out.inlinable[1].specificity.rule);
    }

    #[test]
    fn excluded_pseudo_classes_become_leftovers() {
        let out = partition("a:hover, a { color: red }", PartitionOptions::default());
        assert_eq!(out.inlinable.len(), 1);
        assert_eq!(out.inlinable[0].selector, "a");
        assert_eq!(
            out.leftover,
            vec![Leftover::Selector {
                selector: "a:hover".to_string(),
                declarations: vec![Declaration::new("color", "red", false)],
            }]
        );
    }

    #[test]
    fn included_pseudo_classes_carry_suffix() {
        let out = partition("li:first-child a:hover { color: red }", inline_options());
        let rule = &out.inlinable[0];
        assert_eq!(rule.match_selector, "li:first-child a");
        assert_eq!(rule.pseudo_suffix, ":hover");
    }

    #[test]
    fn structural_pseudo_classes_are_plain() {
        let out = partition("li:last-child { color: red }", PartitionOptions::default());
        assert_eq!(out.inlinable.len(), 1);
        assert_eq!(out.inlinable[0].pseudo_suffix, "");
        assert_eq!(out.inlinable[0].match_selector, "li:last-child");
    }

    #[test]
    fn star_selectors_follow_option() {
        let dropped = partition("* { margin: 0 } div * { padding: 0 }", inline_options());
        assert!(dropped.inlinable.is_empty());
        assert!(dropped.leftover.is_empty());

        let kept = partition(
            "* { margin: 0 }",
            PartitionOptions {
                include_star_selectors: true,
                ..inline_options()
            },
        );
        assert_eq!(kept.inlinable.len(), 1);
    }

    #[test]
    fn media_and_at_rules_are_leftovers() {
        let out = partition(
            "@media print { div { color: white } } @font-face { font-family: X } div { color: black }",
            PartitionOptions::default(),
        );
        assert_eq!(out.inlinable.len(), 1);
        assert!(matches!(out.leftover[0], Leftover::Media(_)));
        assert!(matches!(out.leftover[1], Leftover::Unknown(_)));
    }

    #[test]
    fn ranking_is_by_specificity_then_source_order() {
        let sheet = parse_stylesheet(
            "#id { color: a } .a.b { color: b } div li.a { color: c } h1 { color: d } h1 { color: e }",
            Validation::Off,
        )
        .expect("lenient parse");
        let mut out = partition_stylesheet(
            &sheet,
            0,
            PartitionOptions::default(),
            &StylesheetCache::disabled(),
        );
        rank_rules(&mut out.inlinable);
        let order: Vec<&str> = out
            .inlinable
            .iter()
            .map(|rule| rule.declarations[0].value.as_str())
            .collect();
        assert_eq!(order, vec!["d", "e", "c", "b", "a"]);
    }
}
