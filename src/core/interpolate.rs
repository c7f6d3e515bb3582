//! `${{ ... }}` placeholder rendering for workflow strings.
//!
//! Env values, run commands, and cache key templates may reference context
//! variables (`matrix.python-version`, `services.postgres.port`, `env.FOO`).
//! Rendering is plain substitution; guard conditions use `expr` instead.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Replace every `${{ name }}` occurrence with its value from `vars`.
/// Unknown names are left untouched so callers can layer renders.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    let re = placeholder_re();
    re.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        vars.get(name)
            .cloned()
            .unwrap_or_else(|| caps[0].to_string())
    })
    .to_string()
}
