//! Inline entity references embedded in generated markdown.
//!
//! ```text
//! [repo:<id>:<label>]
//! [person:<email>:<label>]
//! [commit:<id>:<label>]
//! [file:<repo id>:<path>]  or  [file:<repo id>:<path>:<label>]
//! [tag:<label>]
//! ```
//!
//! Parsing is total: anything that does not form a valid annotation stays
//! in the output as literal text, byte for byte. Rendering the parsed
//! segments back therefore reproduces the input, and re-parsing that yields
//! the same segments.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LinkAnnotation {
    #[serde(rename = "repo")]
    Repository { id: String, label: String },
    Person { id: String, label: String },
    File {
        repository_id: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    Commit { id: String, label: String },
    Tag { label: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Segment {
    Text(String),
    Link(LinkAnnotation),
}

impl LinkAnnotation {
    pub fn repository(id: &str, label: &str) -> Self {
        let id = clean_id(id);
        LinkAnnotation::Repository {
            label: clean_label(label, &id),
            id,
        }
    }

    pub fn person(email: &str, label: &str) -> Self {
        let id = clean_id(email);
        LinkAnnotation::Person {
            label: clean_label(label, &id),
            id,
        }
    }

    pub fn commit(id: &str, label: &str) -> Self {
        let id = clean_id(id);
        LinkAnnotation::Commit {
            label: clean_label(label, &id),
            id,
        }
    }

    pub fn file(repository_id: &str, path: &str) -> Self {
        LinkAnnotation::File {
            repository_id: clean_id(repository_id),
            path: clean_id(path),
            label: None,
        }
    }

    pub fn tag(label: &str) -> Self {
        LinkAnnotation::Tag {
            label: clean_label(label, "tag"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LinkAnnotation::Repository { .. } => "repo",
            LinkAnnotation::Person { .. } => "person",
            LinkAnnotation::File { .. } => "file",
            LinkAnnotation::Commit { .. } => "commit",
            LinkAnnotation::Tag { .. } => "tag",
        }
    }

    /// Text a reader should see in place of the annotation.
    pub fn display_label(&self) -> &str {
        match self {
            LinkAnnotation::Repository { label, .. }
            | LinkAnnotation::Person { label, .. }
            | LinkAnnotation::Commit { label, .. }
            | LinkAnnotation::Tag { label } => label,
            LinkAnnotation::File { path, label, .. } => label.as_deref().unwrap_or(path),
        }
    }
}

impl fmt::Display for LinkAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkAnnotation::Repository { id, label } => write!(f, "[repo:{id}:{label}]"),
            LinkAnnotation::Person { id, label } => write!(f, "[person:{id}:{label}]"),
            LinkAnnotation::Commit { id, label } => write!(f, "[commit:{id}:{label}]"),
            LinkAnnotation::File {
                repository_id,
                path,
                label: None,
            } => write!(f, "[file:{repository_id}:{path}]"),
            LinkAnnotation::File {
                repository_id,
                path,
                label: Some(label),
            } => write!(f, "[file:{repository_id}:{path}:{label}]"),
            LinkAnnotation::Tag { label } => write!(f, "[tag:{label}]"),
        }
    }
}

fn is_reserved(c: char) -> bool {
    matches!(c, '[' | ']' | '\n' | '\r')
}

fn clean_id(raw: &str) -> String {
    raw.trim().chars().filter(|&c| !is_reserved(c) && c != ':').collect()
}

fn clean_label(raw: &str, fallback: &str) -> String {
    let label: String = raw.trim().chars().filter(|&c| !is_reserved(c)).collect();
    if label.trim().is_empty() {
        fallback.to_string()
    } else {
        label
    }
}

fn component(raw: Option<&str>) -> Option<String> {
    raw.filter(|s| !s.trim().is_empty()).map(str::to_string)
}

/// Parse the text between `[` and `]`. `None` keeps it literal.
fn parse_annotation(inner: &str) -> Option<LinkAnnotation> {
    let (kind, rest) = inner.split_once(':')?;
    match kind {
        "repo" | "person" | "commit" => {
            let mut parts = rest.splitn(2, ':');
            let id = component(parts.next())?;
            let label = component(parts.next())?;
            Some(match kind {
                "repo" => LinkAnnotation::Repository { id, label },
                "person" => LinkAnnotation::Person { id, label },
                _ => LinkAnnotation::Commit { id, label },
            })
        }
        "file" => {
            let mut parts = rest.splitn(3, ':');
            let repository_id = component(parts.next())?;
            let path = component(parts.next())?;
            let label = match parts.next() {
                Some(raw) => Some(component(Some(raw))?),
                None => None,
            };
            Some(LinkAnnotation::File {
                repository_id,
                path,
                label,
            })
        }
        "tag" => Some(LinkAnnotation::Tag {
            label: component(Some(rest))?,
        }),
        _ => None,
    }
}

/// Split `text` into literal spans and annotations. Never fails.
pub fn parse(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        // An annotation closes before any other bracket or line break.
        let close = after
            .find(is_reserved)
            .filter(|&i| after[i..].starts_with(']'));

        match close.and_then(|i| parse_annotation(&after[..i]).map(|link| (i, link))) {
            Some((i, link)) => {
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Link(link));
                rest = &after[i + 1..];
            }
            None => {
                literal.push('[');
                rest = after;
            }
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    segments
}

/// Rebuild markdown from segments.
pub fn render_literal(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Link(link) => out.push_str(&link.to_string()),
        }
    }
    out
}

/// Replace annotations with their display labels.
pub fn render_plain(text: &str) -> String {
    let mut out = String::new();
    for segment in parse(text) {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Link(link) => out.push_str(link.display_label()),
        }
    }
    out
}

pub fn annotations(text: &str) -> Vec<LinkAnnotation> {
    parse(text)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Link(link) => Some(link),
            Segment::Text(_) => None,
        })
        .collect()
}
