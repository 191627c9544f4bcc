//! `{{param}}` placeholder templates used by system prompts and custom
//! HTTP actions.

use std::sync::OnceLock;

use regex::Regex;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Distinct placeholder names in first-seen order.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for cap in placeholder_re().captures_iter(template) {
        let name = &cap[1];
        if !out.iter().any(|n| n == name) {
            out.push(name.to_owned());
        }
    }
    out
}

/// Replace every placeholder with `lookup(name)`. Unknown names render as
/// the empty string.
pub fn render<F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    placeholder_re()
        .replace_all(template, |cap: &regex::Captures<'_>| {
            lookup(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
