use crate::error::InlinerError;
use kuchiki::NodeRef;
use url::Url;

/// Parses `raw` as an absolute base URL with a scheme.
pub fn parse_base_url(raw: &str) -> Result<Url, InlinerError> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        InlinerError::InvalidConfiguration(format!(
            "base_url {raw:?} must be an absolute URL with a scheme ({err})"
        ))
    })?;
    if url.cannot_be_a_base() {
        return Err(InlinerError::InvalidConfiguration(format!(
            "base_url {raw:?} cannot be used as a base"
        )));
    }
    Ok(url)
}

fn as_directory(base: &Url) -> Url {
    let mut dir = base.clone();
    if !dir.path().ends_with('/') {
        let path = format!("{}/", dir.path());
        dir.set_path(&path);
    }
    dir
}

/// Joins `value` onto `base`, treating the base as a directory. Absolute URLs are left alone.
pub fn join_url(base: &Url, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || Url::parse(value).is_ok() {
        return None;
    }
    let joined = if value.starts_with("//") {
        base.join(value)
    } else {
        as_directory(base).join(value.trim_start_matches('/'))
    };
    match joined {
        Ok(url) => Some(url.to_string()),
        Err(err) => {
            log::debug!("not rewriting {value:?}: {err}");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRewriteOptions {
    pub preserve_internal_links: bool,
    pub preserve_inline_attachments: bool,
}

fn rewrite_attribute(
    document: &NodeRef,
    attribute: &str,
    base: &Url,
    skip: impl Fn(&str) -> bool,
) -> usize {
    let Ok(elements) = document.select(&format!("[{attribute}]")) else {
        return 0;
    };
    let mut rewritten = 0usize;
    for element in elements {
        let mut attrs = element.attributes.borrow_mut();
        let Some(current) = attrs.get(attribute).map(str::to_string) else {
            continue;
        };
        if skip(&current) {
            continue;
        }
        if let Some(joined) = join_url(base, &current) {
            attrs.insert(attribute, joined);
            rewritten += 1;
        }
    }
    rewritten
}

/// Rewrites relative `href`/`src` values against `base`. Returns the number of rewritten values.
pub fn rewrite_links(document: &NodeRef, base: &Url, options: LinkRewriteOptions) -> usize {
    let hrefs = rewrite_attribute(document, "href", base, |value| {
        (options.preserve_internal_links && value.starts_with('#')) || value.starts_with("tel:")
    });
    let srcs = rewrite_attribute(document, "src", base, |value| {
        options.preserve_inline_attachments && value.starts_with("cid:")
    });
    hrefs + srcs
}
