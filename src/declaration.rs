//! Declaration-block parsing.
//!
//! Values are kept as raw trimmed text: the engine never interprets them beyond the `unset`
//! keyword and the `!important` suffix.
use cssparser::AtRuleParser;
use cssparser::BasicParseErrorKind;
use cssparser::CowRcStr;
use cssparser::DeclarationParser;
use cssparser::ParseError;
use cssparser::Parser;
use cssparser::ParserInput;
use cssparser::ParserState;
use cssparser::QualifiedRuleParser;
use cssparser::RuleBodyItemParser;
use cssparser::RuleBodyParser;
use std::sync::{Mutex, PoisonError};

/// A single `property: value [!important]` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

impl Declaration {
    pub fn new(property: impl Into<String>, value: impl Into<String>, important: bool) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
            important,
        }
    }

    pub fn is_unset(&self) -> bool {
        self.value.eq_ignore_ascii_case("unset")
    }

    /// `prop:value`, with ` !important` appended when asked to keep the marker.
    pub fn to_css(&self, keep_important: bool) -> String {
        if keep_important && self.important {
            format!("{}:{} !important", self.property, self.value)
        } else {
            format!("{}:{}", self.property, self.value)
        }
    }
}

// Every block parse in the process goes through this section.
static PARSE_SECTION: Mutex<()> = Mutex::new(());

fn exclusive<T>(parse: impl FnOnce() -> T) -> T {
    let _guard = PARSE_SECTION
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    parse()
}

fn split_important(raw: &str) -> (&str, bool) {
    let trimmed = raw.trim();
    if let Some(bang) = trimmed.rfind('!')
        && trimmed[bang + 1..].trim().eq_ignore_ascii_case("important")
    {
        return (trimmed[..bang].trim_end(), true);
    }
    (trimmed, false)
}

fn normalize_property(name: &str) -> String {
    if name.starts_with("--") {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

struct BlockParser;

impl<'i> DeclarationParser<'i> for BlockParser {
    type Declaration = Declaration;
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _declaration_start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let start = input.position();
        while input.next_including_whitespace_and_comments().is_ok() {}
        let (value, important) = split_important(input.slice_from(start));
        if value.is_empty() {
            return Err(input.new_error(BasicParseErrorKind::EndOfInput));
        }
        Ok(Declaration {
            property: normalize_property(&name),
            value: value.to_string(),
            important,
        })
    }
}

impl<'i> AtRuleParser<'i> for BlockParser {
    type Prelude = ();
    type AtRule = Declaration;
    type Error = ();
}

impl<'i> QualifiedRuleParser<'i> for BlockParser {
    type Prelude = ();
    type QualifiedRule = Declaration;
    type Error = ();
}

impl<'i> RuleBodyItemParser<'i, Declaration, ()> for BlockParser {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        false
    }
}

/// Parses `k:v; k2:v2` leniently: malformed items are dropped, the rest kept in order.
pub fn parse_declarations(block: &str) -> Vec<Declaration> {
    exclusive(|| {
        let mut input = ParserInput::new(block);
        let mut parser = Parser::new(&mut input);
        let mut body = BlockParser;
        let mut out = Vec::new();
        for item in RuleBodyParser::new(&mut parser, &mut body) {
            match item {
                Ok(declaration) => out.push(declaration),
                Err((_, slice)) => {
                    log::debug!("dropping malformed declaration {:?}", slice.trim());
                }
            }
        }
        out
    })
}

/// Parses a `style` attribute, including the grouped form this engine writes for pseudo-classes
/// (`{color:red} :hover{color:blue}`). Returns `(pseudo_suffix, declarations)` groups; the plain
/// group has an empty suffix.
pub fn parse_style_attribute(text: &str) -> Vec<(String, Vec<Declaration>)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if !trimmed.contains('{') {
        return vec![(String::new(), parse_declarations(trimmed))];
    }

    let mut groups: Vec<(String, Vec<Declaration>)> = Vec::new();
    let mut rest = trimmed;
    while let Some(open) = rest.find('{') {
        let suffix = rest[..open].trim().to_string();
        let body = &rest[open + 1..];
        let mut depth = 1usize;
        let mut close = body.len();
        for (idx, ch) in body.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        close = idx;
                        break;
                    }
                }
                _ => {}
            }
        }
        let declarations = parse_declarations(&body[..close]);
        match groups.iter_mut().find(|(existing, _)| *existing == suffix) {
            Some((_, existing)) => existing.extend(declarations),
            None => groups.push((suffix, declarations)),
        }
        rest = body.get(close + 1..).unwrap_or("");
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_in_order() {
        let decls = parse_declarations("font-size:1px; Color: Red ;font-weight:bold");
        assert_eq!(
            decls,
            vec![
                Declaration::new("font-size", "1px", false),
                Declaration::new("color", "Red", false),
                Declaration::new("font-weight", "bold", false),
            ]
        );
    }

    #[test]
    fn recognizes_important_suffix() {
        let decls = parse_declarations("font-size:1px !important; color: red ! IMPORTANT");
        assert_eq!(decls[0], Declaration::new("font-size", "1px", true));
        assert_eq!(decls[1], Declaration::new("color", "red", true));
    }

    #[test]
    fn keeps_urls_and_strings_intact() {
        let decls = parse_declarations(
            "background:url(http://example.com/bg.png); content:\"a;b\"; background-image: url(\"data:image/png;base64,iVBORw0KGg\")",
        );
        assert_eq!(decls[0].value, "url(http://example.com/bg.png)");
        assert_eq!(decls[1].value, "\"a;b\"");
        assert_eq!(
            decls[2].value,
            "url(\"data:image/png;base64,iVBORw0KGg\")"
        );
    }

    #[test]
    fn drops_malformed_declarations_only() {
        let decls = parse_declarations("color red; font-size:2px; :bad; width:; height:3px");
        assert_eq!(
            decls,
            vec![
                Declaration::new("font-size", "2px", false),
                Declaration::new("height", "3px", false),
            ]
        );
    }

    #[test]
    fn custom_properties_keep_case() {
        let decls = parse_declarations("--Brand-Color: #123");
        assert_eq!(decls[0].property, "--Brand-Color");
    }

    #[test]
    fn to_css_respects_marker() {
        let decl = Declaration::new("color", "red", true);
        assert_eq!(decl.to_css(true), "color:red !important");
        assert_eq!(decl.to_css(false), "color:red");
    }

    #[test]
    fn plain_style_attribute_is_one_group() {
        let groups = parse_style_attribute("color: red; font-size: 2px");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "");
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn grouped_style_attribute_round_trips() {
        let groups = parse_style_attribute("{color:pink} :hover{color:purple} :active{color:red}");
        let suffixes: Vec<&str> = groups.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(suffixes, vec!["", ":hover", ":active"]);
        assert_eq!(groups[1].1, vec![Declaration::new("color", "purple", false)]);
    }

    #[test]
    fn grouped_without_plain_block() {
        let groups = parse_style_attribute(":hover{color:purple}");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, ":hover");
    }

    #[test]
    fn concurrent_parses_do_not_interfere() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..50 {
                        let decls = parse_declarations("background-color:#ffffff;");
                        assert_eq!(decls.len(), 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("parser thread panicked");
        }
    }
}
