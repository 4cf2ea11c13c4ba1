//! Optimization Stage - Reduction, Naming and Inlining
//!
//! Turns transformed module content into an `Artifact`: minified when the
//! settings ask for it, named from its path template, and inlined as a data
//! URI when it is a binary asset under the size threshold.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::config::BuildSettings;
use crate::error::{BuildError, Result};
use crate::hashing::sha256_hex;
use crate::module::{Content, ModuleKind};
use crate::naming::{expand, NameParts};

/// Where an artifact ends up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Placement {
    /// Written to this path, relative to the output directory.
    File(PathBuf),
    /// Embedded into referencing output as a data URI.
    Inline(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub source: String,
    pub kind: ModuleKind,
    pub placement: Placement,
    pub content_hash: String,
    pub size: usize,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn is_inlined(&self) -> bool {
        matches!(self.placement, Placement::Inline(_))
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        match &self.placement {
            Placement::File(path) => Some(path),
            Placement::Inline(_) => None,
        }
    }
}

/// A module that made it through its chain, ready for optimization.
#[derive(Debug, Clone)]
pub struct ArtifactCandidate {
    pub source: String,
    pub name: String,
    pub ext: String,
    pub kind: ModuleKind,
    pub content: Content,
    pub template: String,
}

pub struct OptimizationStage {
    settings: BuildSettings,
}

impl OptimizationStage {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub fn optimize(&self, candidate: ArtifactCandidate) -> Result<Artifact> {
        let bytes = self.reduce(&candidate)?;
        let content_hash = sha256_hex(&bytes);
        let size = bytes.len();

        if candidate.kind == ModuleKind::Asset && size < self.settings.inline_limit {
            debug!(path = %candidate.source, size, "inlining asset");
            return Ok(Artifact {
                placement: Placement::Inline(data_uri(&candidate.ext, &bytes)),
                source: candidate.source,
                kind: candidate.kind,
                content_hash,
                size,
                bytes: vec![],
            });
        }

        let path = expand(
            &candidate.template,
            &NameParts {
                name: &candidate.name,
                ext: &candidate.ext,
                content: &bytes,
                hot: self.settings.hot,
            },
        );
        debug!(path = %candidate.source, output = %path, size, "named artifact");

        Ok(Artifact {
            source: candidate.source,
            kind: candidate.kind,
            placement: Placement::File(PathBuf::from(path)),
            content_hash,
            size,
            bytes,
        })
    }

    fn reduce(&self, candidate: &ArtifactCandidate) -> Result<Vec<u8>> {
        if !self.settings.minimize {
            return Ok(candidate.content.as_bytes().to_vec());
        }
        match (&candidate.kind, &candidate.content) {
            (ModuleKind::Script, Content::Text(text)) => Ok(minify_script(text).into_bytes()),
            (ModuleKind::Style, Content::Text(text)) => minify_style(text)
                .map(String::into_bytes)
                .map_err(|message| BuildError::OptimizationFailure {
                    path: candidate.source.clone(),
                    message,
                }),
            _ => Ok(candidate.content.as_bytes().to_vec()),
        }
    }
}

/// Whitespace-level script reduction: trailing blanks and empty lines go.
/// Lines that start or end inside a template literal or a continued string
/// are kept byte for byte.
pub fn minify_script(text: &str) -> String {
    let mut scanner = ScriptScanner::default();
    let mut out = Vec::new();
    for line in text.lines() {
        let starts_inside = scanner.in_literal();
        scanner.feed_line(line);
        let kept = if scanner.in_literal() { line } else { line.trim_end() };
        if !starts_inside && kept.trim().is_empty() {
            continue;
        }
        out.push(kept);
    }
    out.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Quote(char),
    Template,
    LineComment,
    BlockComment,
}

/// Tracks just enough script lexing to know whether a line break falls
/// inside a literal. Regex literals are not recognized.
#[derive(Debug)]
struct ScriptScanner {
    state: Lex,
    /// Open `{` count for each enclosing `${` substitution.
    substitutions: Vec<usize>,
}

impl Default for ScriptScanner {
    fn default() -> Self {
        Self {
            state: Lex::Code,
            substitutions: vec![],
        }
    }
}

impl ScriptScanner {
    fn in_literal(&self) -> bool {
        matches!(self.state, Lex::Template | Lex::Quote(_))
    }

    fn feed_line(&mut self, line: &str) {
        let chars: Vec<char> = line.chars().collect();
        let mut continued = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match self.state {
                Lex::Code => match (c, next) {
                    ('/', Some('/')) => self.state = Lex::LineComment,
                    ('/', Some('*')) => {
                        self.state = Lex::BlockComment;
                        i += 1;
                    }
                    ('\'', _) | ('"', _) => self.state = Lex::Quote(c),
                    ('`', _) => self.state = Lex::Template,
                    ('{', _) => {
                        if let Some(open) = self.substitutions.last_mut() {
                            *open += 1;
                        }
                    }
                    ('}', _) => match self.substitutions.last_mut() {
                        Some(0) => {
                            self.substitutions.pop();
                            self.state = Lex::Template;
                        }
                        Some(open) => *open -= 1,
                        None => {}
                    },
                    _ => {}
                },
                Lex::Quote(q) => {
                    if c == '\\' {
                        continued = next.is_none();
                        i += 1;
                    } else if c == q {
                        self.state = Lex::Code;
                    }
                }
                Lex::Template => match (c, next) {
                    ('\\', _) => i += 1,
                    ('`', _) => self.state = Lex::Code,
                    ('$', Some('{')) => {
                        self.substitutions.push(0);
                        self.state = Lex::Code;
                        i += 1;
                    }
                    _ => {}
                },
                Lex::LineComment => break,
                Lex::BlockComment => {
                    if c == '*' && next == Some('/') {
                        self.state = Lex::Code;
                        i += 1;
                    }
                }
            }
            i += 1;
        }

        match self.state {
            Lex::LineComment => self.state = Lex::Code,
            // Plain strings end at the line break unless it was escaped.
            Lex::Quote(_) if !continued => self.state = Lex::Code,
            _ => {}
        }
    }
}

const CSS_PUNCT: [char; 5] = ['{', '}', ':', ';', ','];

/// Stylesheet minification. Fails on unterminated comments or strings and on
/// unbalanced braces.
pub fn minify_style(text: &str) -> std::result::Result<String, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut depth: i32 = 0;
    let mut line = 1usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let start_line = line;
            let mut j = i + 2;
            loop {
                match chars.get(j) {
                    None => return Err(format!("unterminated comment starting on line {}", start_line)),
                    Some('*') if chars.get(j + 1) == Some(&'/') => break,
                    Some('\n') => line += 1,
                    _ => {}
                }
                j += 1;
            }
            pending_space = true;
            i = j + 2;
            continue;
        }

        if c.is_whitespace() {
            if c == '\n' {
                line += 1;
            }
            pending_space = true;
            i += 1;
            continue;
        }

        if CSS_PUNCT.contains(&c) {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!("unexpected '}}' on line {}", line));
                    }
                    if out.ends_with(';') {
                        out.pop();
                    }
                }
                _ => {}
            }
            out.push(c);
            pending_space = false;
            i += 1;
            continue;
        }

        if pending_space && !out.is_empty() && !out.ends_with(CSS_PUNCT) {
            out.push(' ');
        }
        pending_space = false;

        if c == '"' || c == '\'' {
            let start_line = line;
            out.push(c);
            let mut j = i + 1;
            loop {
                match chars.get(j) {
                    None | Some('\n') => {
                        return Err(format!("unterminated string on line {}", start_line))
                    }
                    Some('\\') => {
                        out.push('\\');
                        if let Some(&escaped) = chars.get(j + 1) {
                            out.push(escaped);
                        }
                        j += 2;
                    }
                    Some(&q) if q == c => {
                        out.push(q);
                        break;
                    }
                    Some(&other) => {
                        out.push(other);
                        j += 1;
                    }
                }
            }
            i = j + 1;
            continue;
        }

        out.push(c);
        i += 1;
    }

    if depth != 0 {
        return Err(format!("{} unclosed block(s)", depth));
    }
    Ok(out)
}

fn mime_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "eot" => "application/vnd.ms-fontobject",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

pub fn data_uri(ext: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_for(ext),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
