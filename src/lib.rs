//! Offline CSS cascade resolution for HTML email.
//!
//! `Inliner::transform` reads every `<style>`/`<link rel="stylesheet">` of a document, resolves the
//! cascade per element and writes the winning declarations into `style` attributes. Rules that
//! cannot be flattened (media queries, excluded pseudo-classes, other at-rules) stay behind in a
//! `<style>` block with every declaration marked `!important`.

mod attributes;
mod cache;
mod cascade;
mod debug;
mod declaration;
mod document;
mod error;
mod leftover;
mod loader;
mod partition;
mod sheet;
mod specificity;
mod urls;
mod xml;

pub use attributes::{apply_legacy_attributes, legacy_attributes, six_color};
pub use cache::{CacheStats, EvictionPolicy, StylesheetCache};
pub use cascade::{Cascade, ElementStyleState, StyleGroup, StyleValue, accumulate, merge};
use debug::DebugLogger;
pub use declaration::{Declaration, parse_declarations, parse_style_attribute};
pub use document::OutputMethod;
use document::{SourceAction, SourceKind, StylesheetSource};
pub use error::InlinerError;
pub use leftover::leftover_to_css;
#[cfg(feature = "http")]
pub use loader::HttpFetcher;
pub use loader::{LoadedStylesheet, OfflineFetcher, StylesheetLoader, StylesheetOrigin, UrlFetcher};
pub use partition::{
    InlinableRule, Leftover, Partition, PartitionOptions, partition_stylesheet, rank_rules,
};
pub use sheet::{
    CssRule, MediaRule, StyleRule, Stylesheet, UnknownRule, Validation, parse_stylesheet,
};
pub use specificity::Specificity;
pub use urls::{LinkRewriteOptions, join_url, parse_base_url, rewrite_links};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

#[derive(Debug, Clone)]
struct InlinerOptions {
    preserve_internal_links: bool,
    preserve_inline_attachments: bool,
    exclude_pseudoclasses: bool,
    keep_style_tags: bool,
    include_star_selectors: bool,
    remove_classes: bool,
    capitalize_float_margin: bool,
    align_floating_images: bool,
    strip_important: bool,
    disable_basic_attributes: BTreeSet<String>,
    validation: Validation,
    disable_link_rewrites: bool,
    remove_unset_properties: bool,
    method: OutputMethod,
    external_styles: Vec<String>,
    css_text: Vec<String>,
}

pub struct Inliner {
    options: InlinerOptions,
    base_url: Option<Url>,
    cache: Arc<StylesheetCache>,
    loader: StylesheetLoader,
    debug: Option<Arc<DebugLogger>>,
}

struct PendingSource {
    source: StylesheetSource,
    text: String,
    leftover: String,
}

impl Inliner {
    pub fn builder() -> InlinerBuilder {
        InlinerBuilder::new()
    }

    pub fn cache(&self) -> &StylesheetCache {
        &self.cache
    }

    pub fn transform(&self, html: &str) -> Result<String, InlinerError> {
        let out = self.transform_at(None, html);
        self.flush_debug();
        out
    }

    /// Transforms documents in parallel; results keep input order.
    pub fn transform_many<S>(&self, documents: &[S]) -> Vec<Result<String, InlinerError>>
    where
        S: AsRef<str> + Sync,
    {
        use rayon::prelude::*;

        let results: Vec<Result<String, InlinerError>> = documents
            .par_iter()
            .enumerate()
            .map(|(idx, html)| self.transform_at(Some(idx), html.as_ref()))
            .collect();
        self.emit_debug_summary("transform_many");
        results
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            let stats = self.cache.stats();
            let (hits, misses, entries) = (
                stats.hits.to_string(),
                stats.misses.to_string(),
                stats.entries.to_string(),
            );
            logger.log_event(
                "cache",
                &[
                    ("policy", self.cache.policy().as_str()),
                    ("hits", hits.as_str()),
                    ("misses", misses.as_str()),
                    ("entries", entries.as_str()),
                ],
            );
            logger.emit_summary(context);
            logger.flush();
        }
    }

    fn flush_debug(&self) {
        if let Some(logger) = self.debug.as_deref() {
            logger.flush();
        }
    }

    fn count(&self, key: &str, amount: usize) {
        if let Some(logger) = self.debug.as_deref() {
            logger.increment(key, amount as u64);
        }
    }

    fn span(&self, name: &str, doc_id: Option<usize>, started: Instant) {
        if let Some(logger) = self.debug.as_deref() {
            logger.log_span_ms(name, doc_id, started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    fn partition_options(&self) -> PartitionOptions {
        PartitionOptions {
            exclude_pseudoclasses: self.options.exclude_pseudoclasses,
            include_star_selectors: self.options.include_star_selectors,
        }
    }

    /// Parses and partitions one stylesheet, returning its leftover CSS.
    fn read_sheet(
        &self,
        css: &str,
        sheet_index: u32,
        inlinable: &mut Vec<InlinableRule>,
    ) -> Result<String, InlinerError> {
        let sheet = parse_stylesheet(css, self.options.validation)?;
        let partition =
            partition_stylesheet(&sheet, sheet_index, self.partition_options(), &self.cache);
        self.count("rules.inlinable", partition.inlinable.len());
        self.count("rules.leftover", partition.leftover.len());
        inlinable.extend(partition.inlinable);
        Ok(leftover_to_css(&partition.leftover, &self.cache))
    }

    fn source_action(&self, pending: &PendingSource) -> SourceAction {
        let method = self.options.method;
        match pending.source.kind {
            SourceKind::Style if self.options.keep_style_tags => SourceAction::Keep,
            SourceKind::Link if self.options.keep_style_tags => {
                SourceAction::ReplaceWithStyle(method.style_text(&pending.text))
            }
            SourceKind::Style if !pending.leftover.is_empty() => {
                SourceAction::SetText(method.style_text(&pending.leftover))
            }
            SourceKind::Link if !pending.leftover.is_empty() => {
                SourceAction::ReplaceWithStyle(method.style_text(&pending.leftover))
            }
            _ => SourceAction::Remove,
        }
    }

    fn write_styles(&self, elements: Vec<(kuchiki::NodeRef, ElementStyleState)>) -> usize {
        let disabled = &self.options.disable_basic_attributes;
        let mut styled = 0usize;
        for (node, state) in elements {
            let Some(element) = node.as_element() else {
                continue;
            };
            match state.serialize(self.options.strip_important) {
                Some(style) => {
                    element.attributes.borrow_mut().insert("style", style);
                    styled += 1;
                }
                None => {
                    element.attributes.borrow_mut().remove("style");
                }
            }
            if let Some(plain) = state.plain() {
                let pairs = legacy_attributes(
                    plain
                        .iter()
                        .map(|(name, value)| (name, value.value.as_str())),
                );
                apply_legacy_attributes(element, &pairs, false, disabled);
                let winners = state.inline_winners();
                let forced = legacy_attributes(winners.iter().map(|declaration| {
                    (declaration.property.as_str(), declaration.value.as_str())
                }));
                apply_legacy_attributes(element, &forced, true, disabled);
            }
        }
        styled
    }

    fn transform_at(&self, doc_id: Option<usize>, html: &str) -> Result<String, InlinerError> {
        let started = Instant::now();
        let document = self.options.method.parse(html)?;
        self.span("parse", doc_id, started);

        let collect_started = Instant::now();
        let mut inlinable: Vec<InlinableRule> = Vec::new();
        let mut pending: Vec<PendingSource> = Vec::new();
        let mut sheet_index = 0u32;
        for source in document::collect_sources(&document) {
            let text = match (&source.kind, &source.href) {
                (SourceKind::Link, Some(href)) => self.loader.load(href)?.text,
                _ => source.node.text_contents(),
            };
            if let Some(logger) = self.debug.as_deref() {
                logger.log_event(
                    "source",
                    &[
                        ("kind", source.kind.as_str()),
                        ("href", source.href.as_deref().unwrap_or("")),
                    ],
                );
            }
            let leftover = self.read_sheet(&text, sheet_index, &mut inlinable)?;
            sheet_index = sheet_index.saturating_add(1);
            pending.push(PendingSource {
                source,
                text,
                leftover,
            });
        }
        let mut head_styles: Vec<String> = Vec::new();
        for location in &self.options.external_styles {
            let loaded = self.loader.load(location)?;
            head_styles.push(self.read_sheet(&loaded.text, sheet_index, &mut inlinable)?);
            sheet_index = sheet_index.saturating_add(1);
        }
        for css in &self.options.css_text {
            head_styles.push(self.read_sheet(css, sheet_index, &mut inlinable)?);
            sheet_index = sheet_index.saturating_add(1);
        }
        self.count("sources", sheet_index as usize);
        self.span("collect", doc_id, collect_started);

        for item in &pending {
            document::apply_source_action(&item.source.node, self.source_action(item))?;
        }
        for css in head_styles.iter().filter(|css| !css.is_empty()) {
            document::append_head_style(&document, &self.options.method.style_text(css))?;
        }

        let cascade_started = Instant::now();
        rank_rules(&mut inlinable);
        let cascade = accumulate(
            &document,
            &inlinable,
            self.options.remove_unset_properties,
        );
        if cascade.is_empty() {
            log::debug!("no inlinable rule matched an element");
        }
        self.count("elements.matched", cascade.len());
        self.span("accumulate", doc_id, cascade_started);

        let write_started = Instant::now();
        let styled = self.write_styles(cascade.into_elements());
        self.count("elements.styled", styled);

        if self.options.remove_classes {
            document::remove_classes(&document);
        }
        if self.options.align_floating_images {
            document::align_floating_images(&document);
        }
        if self.options.capitalize_float_margin {
            document::capitalize_float_margin(&document);
        }
        if let Some(base) = &self.base_url
            && !self.options.disable_link_rewrites
        {
            let rewritten = rewrite_links(
                &document,
                base,
                LinkRewriteOptions {
                    preserve_internal_links: self.options.preserve_internal_links,
                    preserve_inline_attachments: self.options.preserve_inline_attachments,
                },
            );
            self.count("links.rewritten", rewritten);
        }
        self.span("write", doc_id, write_started);

        self.options.method.serialize(&document)
    }
}

/// One-shot transform with default settings.
pub fn transform(html: &str) -> Result<String, InlinerError> {
    Inliner::builder().build()?.transform(html)
}

pub struct InlinerBuilder {
    base_url: Option<String>,
    base_path: Option<PathBuf>,
    preserve_internal_links: bool,
    preserve_inline_attachments: bool,
    exclude_pseudoclasses: bool,
    keep_style_tags: bool,
    include_star_selectors: bool,
    remove_classes: bool,
    capitalize_float_margin: bool,
    align_floating_images: bool,
    strip_important: bool,
    disable_basic_attributes: BTreeSet<String>,
    disable_validation: bool,
    strict_validation: bool,
    disable_link_rewrites: bool,
    remove_unset_properties: bool,
    allow_network: bool,
    method: OutputMethod,
    external_styles: Vec<String>,
    css_text: Vec<String>,
    cache: Option<Arc<StylesheetCache>>,
    fetcher: Option<Arc<dyn UrlFetcher>>,
    debug_path: Option<PathBuf>,
}

impl Default for InlinerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InlinerBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            base_path: None,
            preserve_internal_links: false,
            preserve_inline_attachments: true,
            exclude_pseudoclasses: true,
            keep_style_tags: false,
            include_star_selectors: false,
            remove_classes: false,
            capitalize_float_margin: false,
            align_floating_images: true,
            strip_important: true,
            disable_basic_attributes: BTreeSet::new(),
            disable_validation: false,
            strict_validation: false,
            disable_link_rewrites: false,
            remove_unset_properties: true,
            allow_network: true,
            method: OutputMethod::Html,
            external_styles: Vec::new(),
            css_text: Vec::new(),
            cache: None,
            fetcher: None,
            debug_path: None,
        }
    }

    /// Base for relative `href`/`src` values and stylesheet fallbacks. Must carry a scheme.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Directory that relative `<link href>` and external-style paths are read from.
    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn preserve_internal_links(mut self, enabled: bool) -> Self {
        self.preserve_internal_links = enabled;
        self
    }

    pub fn preserve_inline_attachments(mut self, enabled: bool) -> Self {
        self.preserve_inline_attachments = enabled;
        self
    }

    pub fn exclude_pseudoclasses(mut self, enabled: bool) -> Self {
        self.exclude_pseudoclasses = enabled;
        self
    }

    pub fn keep_style_tags(mut self, enabled: bool) -> Self {
        self.keep_style_tags = enabled;
        self
    }

    pub fn include_star_selectors(mut self, enabled: bool) -> Self {
        self.include_star_selectors = enabled;
        self
    }

    pub fn remove_classes(mut self, enabled: bool) -> Self {
        self.remove_classes = enabled;
        self
    }

    // Outlook.com ignores lowercase margin/float in style attributes.
    pub fn capitalize_float_margin(mut self, enabled: bool) -> Self {
        self.capitalize_float_margin = enabled;
        self
    }

    pub fn align_floating_images(mut self, enabled: bool) -> Self {
        self.align_floating_images = enabled;
        self
    }

    pub fn strip_important(mut self, enabled: bool) -> Self {
        self.strip_important = enabled;
        self
    }

    pub fn disable_basic_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disable_basic_attributes = names
            .into_iter()
            .map(|name| name.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Skips the lightningcss check; problems are otherwise logged at `warn`.
    pub fn disable_validation(mut self, disabled: bool) -> Self {
        self.disable_validation = disabled;
        self
    }

    /// Makes the first CSS problem a `Css` error instead of a warning.
    pub fn strict_validation(mut self, enabled: bool) -> Self {
        self.strict_validation = enabled;
        self
    }

    pub fn method(mut self, method: OutputMethod) -> Self {
        self.method = method;
        self
    }

    pub fn disable_link_rewrites(mut self, disabled: bool) -> Self {
        self.disable_link_rewrites = disabled;
        self
    }

    pub fn remove_unset_properties(mut self, enabled: bool) -> Self {
        self.remove_unset_properties = enabled;
        self
    }

    pub fn allow_network(mut self, enabled: bool) -> Self {
        self.allow_network = enabled;
        self
    }

    /// Stylesheet path or URL applied after the document's own stylesheets.
    pub fn external_style(mut self, location: impl Into<String>) -> Self {
        self.external_styles.push(location.into());
        self
    }

    /// Raw CSS applied after the document's own and external stylesheets.
    pub fn css_text(mut self, css: impl Into<String>) -> Self {
        self.css_text.push(css.into());
        self
    }

    pub fn cache(mut self, cache: Arc<StylesheetCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn UrlFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Inliner, InlinerError> {
        let validation = match (self.disable_validation, self.strict_validation) {
            (true, true) => {
                return Err(InlinerError::InvalidConfiguration(
                    "disable_validation and strict_validation cannot both be set".to_string(),
                ));
            }
            (true, false) => Validation::Off,
            (false, true) => Validation::Strict,
            (false, false) => Validation::Warn,
        };
        let base_url = match self.base_url.as_deref() {
            Some(raw) => Some(parse_base_url(raw)?),
            None => None,
        };
        if let Some(path) = &self.base_path
            && !path.is_dir()
        {
            return Err(InlinerError::InvalidConfiguration(format!(
                "base_path {} is not a directory",
                path.display()
            )));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let fetcher = self.fetcher.unwrap_or_else(loader::default_fetcher);
        let loader = StylesheetLoader::new(
            base_url.clone(),
            self.base_path,
            self.allow_network,
            fetcher,
        );
        Ok(Inliner {
            options: InlinerOptions {
                preserve_internal_links: self.preserve_internal_links,
                preserve_inline_attachments: self.preserve_inline_attachments,
                exclude_pseudoclasses: self.exclude_pseudoclasses,
                keep_style_tags: self.keep_style_tags,
                include_star_selectors: self.include_star_selectors,
                remove_classes: self.remove_classes,
                capitalize_float_margin: self.capitalize_float_margin,
                align_floating_images: self.align_floating_images,
                strip_important: self.strip_important,
                disable_basic_attributes: self.disable_basic_attributes,
                validation,
                disable_link_rewrites: self.disable_link_rewrites,
                remove_unset_properties: self.remove_unset_properties,
                method: self.method,
                external_styles: self.external_styles,
                css_text: self.css_text,
            },
            base_url,
            cache: self.cache.unwrap_or_default(),
            loader,
            debug,
        })
    }
}
