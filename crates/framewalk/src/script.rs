//! Manifest extraction from a rendered player frame.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, trace};

use crate::content::ManifestUrl;
use crate::error::ResolveError;
use crate::unpacker;

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());
static MANIFEST_SOURCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"sources:\s*\[\s*\{\s*src:\s*"([^"]+)""#).unwrap());

/// Finds the packed player script in `html` and recovers its manifest URL.
///
/// Packed scripts are tried in document order; the first one whose unpacked
/// body declares a source wins. The error tells apart a frame with no packed
/// script at all ([`ResolveError::ScriptNotFound`]) from one whose packed
/// scripts carry no source ([`ResolveError::ManifestPatternNotFound`]).
pub fn extract_manifest(html: &str) -> Result<ManifestUrl, ResolveError> {
    let document = Html::parse_document(html);
    let mut packed_scripts = 0usize;

    for script in document.select(&SCRIPT) {
        let text: String = script.text().collect();
        if !unpacker::is_packed(&text) {
            continue;
        }
        packed_scripts += 1;

        match unpacker::unpack(&text) {
            Ok(source) => {
                trace!(len = source.len(), "Unpacked player script");
                if let Some(url) = manifest_source(&source) {
                    return Ok(url);
                }
            }
            Err(e) => debug!(error = %e, "Failed to unpack script"),
        }
    }

    if packed_scripts == 0 {
        Err(ResolveError::ScriptNotFound)
    } else {
        Err(ResolveError::ManifestPatternNotFound)
    }
}

/// Like [`extract_manifest`], without the failure distinction.
pub fn find_manifest(html: &str) -> Option<ManifestUrl> {
    extract_manifest(html).ok()
}

fn manifest_source(source: &str) -> Option<ManifestUrl> {
    MANIFEST_SOURCE
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| ManifestUrl::new(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_FRAME: &str = include_str!("../tests/fixtures/player_frame.html");
    const PLAYER_FRAME_UNSOURCED: &str = include_str!("../tests/fixtures/player_frame_unsourced.html");

    fn packed(payload: &str, symbols: &[&str]) -> String {
        format!(
            "<script>eval(function(p,a,c,k,e,d){{return p}}('{payload}',36,{},'{}'.split('|'),0,{{}}))</script>",
            symbols.len(),
            symbols.join("|")
        )
    }

    #[test]
    fn extracts_from_captured_frame() {
        let url = extract_manifest(PLAYER_FRAME).unwrap();
        assert_eq!(url.as_str(), "https://cdn.flexy/hls/a1b2c3/master.m3u8");
    }

    #[test]
    fn extracts_spaced_source_declaration() {
        let html = format!(
            "<html><body>{}</body></html>",
            packed(r#"0: [{ 1: "2://x/y.3" }]"#, &["sources", "src", "https", "m3u8"])
        );
        assert_eq!(find_manifest(&html).unwrap().as_str(), "https://x/y.m3u8");
    }

    #[test]
    fn packed_script_without_source() {
        assert!(matches!(
            extract_manifest(PLAYER_FRAME_UNSOURCED),
            Err(ResolveError::ManifestPatternNotFound)
        ));
    }

    #[test]
    fn no_packed_script() {
        let html = r#"<html><script>var sources = [{src: "https://x/y.m3u8"}];</script></html>"#;
        assert!(matches!(extract_manifest(html), Err(ResolveError::ScriptNotFound)));
        assert_eq!(find_manifest(html), None);
        assert_eq!(find_manifest(""), None);
    }

    #[test]
    fn first_matching_packed_script_wins() {
        let html = format!(
            "<html><body>{}{}{}</body></html>",
            packed("0 1", &["nothing", "here"]),
            packed(r#"0:[{1:"2://a/first.3"}]"#, &["sources", "src", "https", "m3u8"]),
            packed(r#"0:[{1:"2://a/second.3"}]"#, &["sources", "src", "https", "m3u8"]),
        );
        assert_eq!(extract_manifest(&html).unwrap().as_str(), "https://a/first.m3u8");
    }
}
