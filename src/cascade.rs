//! Per-element cascade accumulation.
//!
//! Phase one walks the ranked rules and records, per matched element and per pseudo group, which
//! declaration currently holds each property. Nothing in the document is touched until the
//! accumulated states are serialized.

use crate::declaration::{Declaration, parse_style_attribute};
use crate::partition::InlinableRule;
use crate::specificity::Specificity;
use kuchiki::{Node, NodeRef};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleValue {
    pub value: String,
    pub important: bool,
    pub specificity: Specificity,
}

/// Property map that remembers first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleGroup {
    entries: Vec<(String, StyleValue)>,
    /// Properties removed by an `unset`, with the specificity that removed them.
    cleared: Vec<(String, Specificity)>,
}

impl StyleGroup {
    pub fn get(&self, property: &str) -> Option<&StyleValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    pub fn set(&mut self, property: &str, value: StyleValue) {
        self.cleared.retain(|(name, _)| name != property);
        match self.entries.iter_mut().find(|(name, _)| name == property) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((property.to_string(), value)),
        }
    }

    pub fn remove(&mut self, property: &str) -> Option<StyleValue> {
        let idx = self.entries.iter().position(|(name, _)| name == property)?;
        Some(self.entries.remove(idx).1)
    }

    /// Drops `property` and remembers who dropped it.
    pub fn clear(&mut self, property: &str, specificity: Specificity) {
        self.remove(property);
        match self.cleared.iter_mut().find(|(name, _)| name == property) {
            Some((_, slot)) => *slot = specificity,
            None => self.cleared.push((property.to_string(), specificity)),
        }
    }

    pub fn cleared_by(&self, property: &str) -> Option<Specificity> {
        self.cleared
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, specificity)| *specificity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StyleValue)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `prop:value; prop2:value2`
    pub fn to_css(&self, strip_important: bool) -> String {
        self.entries
            .iter()
            .map(|(name, value)| {
                if value.important && !strip_important {
                    format!("{}:{} !important", name, value.value)
                } else {
                    format!("{}:{}", name, value.value)
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Last-write-wins merge. `unset` deletes the property when `remove_unset` is on.
pub fn merge(
    group: &mut StyleGroup,
    incoming: &[Declaration],
    specificity: Specificity,
    remove_unset: bool,
) {
    for declaration in incoming {
        if remove_unset && declaration.is_unset() {
            group.clear(&declaration.property, specificity);
            continue;
        }
        group.set(
            &declaration.property,
            StyleValue {
                value: declaration.value.clone(),
                important: declaration.important,
                specificity,
            },
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementStyleState {
    groups: Vec<(String, StyleGroup)>,
    inline: Vec<(String, Vec<Declaration>)>,
}

impl ElementStyleState {
    /// State seeded from an existing `style` attribute.
    pub fn seeded(style: Option<&str>, remove_unset: bool) -> Self {
        let mut state = Self::default();
        if let Some(style) = style {
            state.inline = parse_style_attribute(style);
        }
        let inline = state.inline.clone();
        for (suffix, declarations) in &inline {
            state.apply_inline(suffix, declarations, remove_unset);
        }
        state
    }

    fn apply_inline(&mut self, suffix: &str, declarations: &[Declaration], remove_unset: bool) {
        let group = self.group_mut(suffix);
        for declaration in declarations {
            merge(
                group,
                std::slice::from_ref(declaration),
                Specificity::inline(declaration.important),
                remove_unset,
            );
        }
    }

    pub fn group(&self, suffix: &str) -> Option<&StyleGroup> {
        self.groups
            .iter()
            .find(|(name, _)| name == suffix)
            .map(|(_, group)| group)
    }

    pub fn group_mut(&mut self, suffix: &str) -> &mut StyleGroup {
        let idx = match self.groups.iter().position(|(name, _)| name == suffix) {
            Some(idx) => idx,
            None => {
                self.groups.push((suffix.to_string(), StyleGroup::default()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx].1
    }

    pub fn plain(&self) -> Option<&StyleGroup> {
        self.group("")
    }

    pub fn apply_rule(&mut self, rule: &InlinableRule, remove_unset: bool) {
        let group = self.group_mut(&rule.pseudo_suffix);
        merge(group, &rule.declarations, rule.specificity, remove_unset);
    }

    /// Re-applies the element's own declarations unless a stronger rule holds or unsets the
    /// property.
    pub fn reseed(&mut self, remove_unset: bool) {
        let inline = std::mem::take(&mut self.inline);
        for (suffix, declarations) in &inline {
            let group = self.group_mut(suffix);
            for declaration in declarations {
                let specificity = Specificity::inline(declaration.important);
                let outranked = group
                    .get(&declaration.property)
                    .map(|held| held.specificity)
                    .or_else(|| group.cleared_by(&declaration.property))
                    .is_some_and(|stronger| stronger > specificity);
                if outranked {
                    continue;
                }
                merge(
                    group,
                    std::slice::from_ref(declaration),
                    specificity,
                    remove_unset,
                );
            }
        }
        self.inline = inline;
    }

    /// Plain-group declarations currently held by the element's own `style` attribute.
    pub fn inline_winners(&self) -> Vec<Declaration> {
        self.plain()
            .map(|group| {
                group
                    .iter()
                    .filter(|(_, value)| value.specificity.is_inline())
                    .map(|(name, value)| {
                        Declaration::new(name, value.value.clone(), value.important)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Renders the groups as one `style` value; `None` when nothing is left.
    ///
    /// With pseudo groups present the output is `{plain} :hover{...}`. That form is not valid
    /// CSS for a `style` attribute; it is kept for compatibility with existing consumers.
    pub fn serialize(&self, strip_important: bool) -> Option<String> {
        let plain = self
            .plain()
            .filter(|group| !group.is_empty())
            .map(|group| group.to_css(strip_important));
        let mut pseudo: Vec<(&str, &StyleGroup)> = self
            .groups
            .iter()
            .filter(|(suffix, group)| !suffix.is_empty() && !group.is_empty())
            .map(|(suffix, group)| (suffix.as_str(), group))
            .collect();
        if pseudo.is_empty() {
            return plain;
        }
        pseudo.sort_by(|a, b| {
            let colons = |suffix: &str| suffix.matches(':').count();
            colons(a.0).cmp(&colons(b.0)).then_with(|| a.0.cmp(b.0))
        });
        let mut parts = Vec::with_capacity(pseudo.len() + 1);
        if let Some(plain) = plain {
            parts.push(format!("{{{plain}}}"));
        }
        for (suffix, group) in pseudo {
            parts.push(format!("{}{{{}}}", suffix, group.to_css(strip_important)));
        }
        Some(parts.join(" "))
    }
}

/// Accumulated states in first-match order.
#[derive(Default)]
pub struct Cascade {
    elements: Vec<(NodeRef, ElementStyleState)>,
    index: HashMap<*const Node, usize>,
}

impl Cascade {
    fn state_for(&mut self, node: &NodeRef, remove_unset: bool) -> &mut ElementStyleState {
        let key: *const Node = &**node;
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                let style = node.as_element().and_then(|element| {
                    element.attributes.borrow().get("style").map(str::to_string)
                });
                self.elements.push((
                    node.clone(),
                    ElementStyleState::seeded(style.as_deref(), remove_unset),
                ));
                self.index.insert(key, self.elements.len() - 1);
                self.elements.len() - 1
            }
        };
        &mut self.elements[idx].1
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn into_elements(self) -> Vec<(NodeRef, ElementStyleState)> {
        self.elements
    }
}

/// Matches every ranked rule against `document` and merges it into the matched elements.
pub fn accumulate(document: &NodeRef, rules: &[InlinableRule], remove_unset: bool) -> Cascade {
    let mut cascade = Cascade::default();
    for rule in rules {
        let matches = match document.select(&rule.match_selector) {
            Ok(matches) => matches,
            Err(()) => {
                log::warn!("skipping unsupported selector {:?}", rule.selector);
                continue;
            }
        };
        for element in matches {
            cascade
                .state_for(element.as_node(), remove_unset)
                .apply_rule(rule, remove_unset);
        }
    }
    for (_, state) in &mut cascade.elements {
        state.reseed(remove_unset);
    }
    cascade
}
