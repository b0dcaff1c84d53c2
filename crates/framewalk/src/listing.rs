//! Static HTML helpers for listing pages: titles and anchor collection.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::trace;
use url::Url;

use crate::error::ResolveError;

static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());

fn element_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Human title of a content page: the first `<h1>`, else `<title>`.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    element_text(&document, &H1).or_else(|| element_text(&document, &TITLE))
}

/// Absolute `href`s of every element matched by `selector`, in document order.
///
/// Relative links are resolved against `base`; links that cannot be resolved
/// are skipped.
pub fn anchor_hrefs(html: &str, selector: &str, base: &Url) -> Result<Vec<String>, ResolveError> {
    let selector = Selector::parse(selector).map_err(|e| {
        ResolveError::EnumerationFailure(format!("invalid selector {selector:?}: {e}"))
    })?;
    let document = Html::parse_document(html);

    let hrefs = document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| match base.join(href.trim()) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                trace!(href, error = %e, "Skipping unresolvable link");
                None
            }
        })
        .collect();
    Ok(hrefs)
}
