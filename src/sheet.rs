//! Stylesheet reading.
//!
//! Rules are kept as raw text (selector list, declaration block, at-rule prelude) so leftovers can
//! be written back without any value normalization.

use crate::error::InlinerError;
use cssparser::AtRuleParser;
use cssparser::BasicParseErrorKind;
use cssparser::CowRcStr;
use cssparser::ParseError;
use cssparser::Parser;
use cssparser::ParserInput;
use cssparser::ParserState;
use cssparser::QualifiedRuleParser;
use cssparser::StyleSheetParser;
use lightningcss::error::ParserError;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    /// Raw selector list, commas included.
    pub selectors: String,
    /// Raw declaration block without the braces.
    pub block: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRule {
    pub query: String,
    pub rules: Vec<CssRule>,
    /// Raw block text, comments included.
    pub block: String,
}

/// Any at-rule other than `@media`, e.g. `@font-face`, `@keyframes`, `@import`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRule {
    pub name: String,
    pub prelude: String,
    pub block: Option<String>,
}

impl UnknownRule {
    pub fn to_css(&self) -> String {
        let mut out = format!("@{}", self.name);
        if !self.prelude.is_empty() {
            out.push(' ');
            out.push_str(&self.prelude);
        }
        match &self.block {
            Some(block) => {
                out.push_str(" {");
                out.push_str(block.trim());
                out.push('}');
            }
            None => out.push(';'),
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssRule {
    Style(StyleRule),
    Media(MediaRule),
    Unknown(UnknownRule),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub rules: Vec<CssRule>,
}

enum AtPrelude {
    Media(String),
    Other { name: String, prelude: String },
}

struct RuleListParser;

fn consume_raw<'i>(input: &mut Parser<'i, '_>) -> String {
    let start = input.position();
    while input.next_including_whitespace_and_comments().is_ok() {}
    input.slice_from(start).trim().to_owned()
}

impl<'i> AtRuleParser<'i> for RuleListParser {
    type Prelude = AtPrelude;
    type AtRule = CssRule;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        let prelude = consume_raw(input);
        if name.eq_ignore_ascii_case("media") {
            Ok(AtPrelude::Media(prelude))
        } else {
            Ok(AtPrelude::Other {
                name: name.to_string(),
                prelude,
            })
        }
    }

    fn rule_without_block(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        match prelude {
            AtPrelude::Media(_) => Err(()),
            AtPrelude::Other { name, prelude } => Ok(CssRule::Unknown(UnknownRule {
                name,
                prelude,
                block: None,
            })),
        }
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, ParseError<'i, Self::Error>> {
        match prelude {
            AtPrelude::Media(query) => {
                let start = input.position();
                let rules = parse_rule_list(input);
                Ok(CssRule::Media(MediaRule {
                    query,
                    rules,
                    block: input.slice_from(start).trim().to_owned(),
                }))
            }
            AtPrelude::Other { name, prelude } => Ok(CssRule::Unknown(UnknownRule {
                name,
                prelude,
                block: Some(consume_raw(input)),
            })),
        }
    }
}

impl<'i> QualifiedRuleParser<'i> for RuleListParser {
    type Prelude = String;
    type QualifiedRule = CssRule;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        let selectors = consume_raw(input);
        if selectors.is_empty() {
            return Err(input.new_error(BasicParseErrorKind::QualifiedRuleInvalid));
        }
        Ok(selectors)
    }

    fn parse_block<'t>(
        &mut self,
        selectors: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        Ok(CssRule::Style(StyleRule {
            selectors,
            block: consume_raw(input),
        }))
    }
}

fn parse_rule_list(input: &mut Parser<'_, '_>) -> Vec<CssRule> {
    let mut rules = Vec::new();
    let mut top = RuleListParser;
    for item in StyleSheetParser::new(input, &mut top) {
        match item {
            Ok(rule) => rules.push(rule),
            Err((_, slice)) => log::debug!("skipping unreadable rule {:?}", slice.trim()),
        }
    }
    rules
}

/// How stylesheet text is checked by lightningcss before the rules are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// No check.
    Off,
    /// Problems are logged at `warn`; bad declarations are dropped later.
    #[default]
    Warn,
    /// The first problem aborts the transform.
    Strict,
}

fn css_error(err: &lightningcss::error::Error<ParserError<'_>>) -> InlinerError {
    InlinerError::Css {
        message: err.kind.to_string(),
        line: err.loc.as_ref().map(|loc| loc.line + 1),
        column: err.loc.as_ref().map(|loc| loc.column),
    }
}

/// Rejects anything lightningcss cannot parse, reporting the first error as-is.
pub fn validate_css(css: &str) -> Result<(), InlinerError> {
    let options = ParserOptions {
        error_recovery: false,
        ..ParserOptions::default()
    };
    match StyleSheet::parse(css, options) {
        Ok(_) => Ok(()),
        Err(err) => Err(css_error(&err)),
    }
}

/// Parses with error recovery and returns every problem lightningcss reported.
pub fn css_warnings(css: &str) -> Vec<InlinerError> {
    let collected = Arc::new(RwLock::new(Vec::new()));
    let options = ParserOptions {
        error_recovery: true,
        warnings: Some(Arc::clone(&collected)),
        ..ParserOptions::default()
    };
    let mut problems = Vec::new();
    if let Err(err) = StyleSheet::parse(css, options) {
        problems.push(css_error(&err));
    }
    if let Ok(warnings) = collected.read() {
        problems.extend(warnings.iter().map(css_error));
    }
    problems
}

pub fn parse_stylesheet(css: &str, validation: Validation) -> Result<Stylesheet, InlinerError> {
    match validation {
        Validation::Off => {}
        Validation::Warn => {
            for problem in css_warnings(css) {
                log::warn!("{problem}");
            }
        }
        Validation::Strict => validate_css(css)?,
    }
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    Ok(Stylesheet {
        rules: parse_rule_list(&mut parser),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenient(css: &str) -> Stylesheet {
        parse_stylesheet(css, Validation::Off).expect("unchecked parse never fails")
    }

    #[test]
    fn reads_style_rules_raw() {
        let sheet = lenient("h1, h2 > .x { color: #FFF; font-size : 2px }\np{margin:0}");
        assert_eq!(
            sheet.rules[0],
            CssRule::Style(StyleRule {
                selectors: "h1, h2 > .x".to_string(),
                block: "color: #FFF; font-size : 2px".to_string(),
            })
        );
        assert!(matches!(&sheet.rules[1], CssRule::Style(rule) if rule.selectors == "p"));
    }

    #[test]
    fn reads_media_rules_recursively() {
        let sheet =
            lenient("@media screen and (max-width: 600px) { h1 { color: red } p { margin: 0 } }");
        let CssRule::Media(media) = &sheet.rules[0] else {
            panic!("expected a media rule, got {:?}", sheet.rules[0]);
        };
        assert_eq!(media.query, "screen and (max-width: 600px)");
        assert_eq!(media.rules.len(), 2);
    }

    #[test]
    fn keeps_unknown_at_rules() {
        let sheet = lenient(
            "@import url(\"print.css\");\n@font-face { font-family: Brand; src: url(brand.woff) }",
        );
        let CssRule::Unknown(import) = &sheet.rules[0] else {
            panic!("expected @import");
        };
        assert_eq!(import.to_css(), "@import url(\"print.css\");");
        let CssRule::Unknown(font) = &sheet.rules[1] else {
            panic!("expected @font-face");
        };
        assert_eq!(
            font.to_css(),
            "@font-face {font-family: Brand; src: url(brand.woff)}"
        );
    }

    #[test]
    fn ignores_html_comment_markers() {
        let sheet = lenient("<!-- h1 { color: red } -->");
        assert_eq!(sheet.rules.len(), 1);
    }

    #[test]
    fn strict_mode_reports_position() {
        let css = "p { color: red }\nh1..title { color: blue }";
        let err = parse_stylesheet(css, Validation::Strict)
            .expect_err("invalid selector must fail in strict mode");
        match err {
            InlinerError::Css { line, .. } => assert!(line.is_some()),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn strict_mode_accepts_valid_css() {
        let sheet = parse_stylesheet(
            "@media screen { a:hover { color: red } } h1 { color: red }",
            Validation::Strict,
        )
        .expect("valid css");
        assert_eq!(sheet.rules.len(), 2);
    }

    #[test]
    fn warn_mode_recovers_from_bad_declarations() {
        let css = "p { *zoom: 1; color: red }";
        assert!(!css_warnings(css).is_empty());
        let sheet = parse_stylesheet(css, Validation::Warn).expect("warnings are not fatal");
        assert!(matches!(&sheet.rules[0], CssRule::Style(rule) if rule.selectors == "p"));
        assert!(parse_stylesheet(css, Validation::Strict).is_err());
    }

    #[test]
    fn warn_mode_survives_stray_braces() {
        let sheet = parse_stylesheet("p { color: red }}", Validation::Warn).expect("not fatal");
        assert!(matches!(&sheet.rules[0], CssRule::Style(rule) if rule.block == "color: red"));
    }
}
