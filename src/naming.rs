//! Artifact Naming - Path Template Expansion
//!
//! Placeholders: `[name]`, `[ext]`, `[hash]`, `[contenthash]`, optionally
//! with a length (`[hash:6]`). Hashes are computed over final content only.

use regex::Regex;
use std::sync::OnceLock;

use crate::hashing::{content_hash, DEFAULT_HASH_LEN};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(name|ext|hash|contenthash)(?::(\d+))?\]").expect("placeholder pattern is valid")
    })
}

/// Inputs for expanding one path template.
#[derive(Debug, Clone, Copy)]
pub struct NameParts<'a> {
    pub name: &'a str,
    pub ext: &'a str,
    pub content: &'a [u8],
    /// Hot mode drops hash placeholders so names stay stable across updates.
    pub hot: bool,
}

/// Expand `template`. Unknown bracketed tokens are left as written.
pub fn expand(template: &str, parts: &NameParts<'_>) -> String {
    let mut out = String::with_capacity(template.len() + DEFAULT_HASH_LEN);
    let mut last = 0;

    for caps in placeholder_re().captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always present");
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        match &caps[1] {
            "name" => out.push_str(parts.name),
            "ext" => out.push_str(parts.ext),
            _ if parts.hot => {
                if out.ends_with(['.', '_', '-']) {
                    out.pop();
                }
            }
            _ => {
                let len = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(DEFAULT_HASH_LEN);
                out.push_str(&content_hash(parts.content, len));
            }
        }
    }
    out.push_str(&template[last..]);
    out
}
