//! `{{name}}` token substitution for workflow parameters.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("invalid token pattern"));

/// Resolve `{{name}}` tokens against a variable map. Unresolved names
/// interpolate to the empty string, never an error.
pub fn interpolate(template: &str, vars: &HashMap<String, String>) -> String {
    TOKEN
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
