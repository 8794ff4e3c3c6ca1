use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// File extension of documents tracked by the tree
pub const DOCUMENT_EXTENSION: &str = "md";

/// Link and title fields of a document's YAML frontmatter.
///
/// Unknown keys are kept in `extra` so a rewrite never drops user data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_file: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_file_list"
    )]
    pub children_files: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// `children_files` may be absent, null, a single string, or a list
fn deserialize_file_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FileList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<FileList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(FileList::One(file)) => vec![file],
        Some(FileList::Many(files)) => files,
    })
}

/// A markdown document split into frontmatter and body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub frontmatter: Option<Frontmatter>,
    pub body: String,
}

/// Split `---` delimited frontmatter from the body.
///
/// Returns `(yaml, body)`, or `None` when the document has no frontmatter block.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Parse the frontmatter YAML block
pub fn parse_frontmatter(yaml: &str) -> Result<Frontmatter> {
    if yaml.trim().is_empty() {
        return Ok(Frontmatter::default());
    }
    serde_yaml::from_str(yaml).context("Failed to parse frontmatter")
}

/// Parse a markdown document
pub fn parse_document(content: &str) -> Result<Document> {
    match split_frontmatter(content) {
        Some((yaml, body)) => Ok(Document {
            frontmatter: Some(parse_frontmatter(yaml)?),
            body: body.to_string(),
        }),
        None => Ok(Document {
            frontmatter: None,
            body: content.to_string(),
        }),
    }
}

/// Render a document back to markdown with a frontmatter block
pub fn render_document(frontmatter: &Frontmatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(frontmatter).context("Failed to serialize frontmatter")?;
    let mut output = String::new();
    output.push_str("---\n");
    if yaml.trim() != "{}" {
        output.push_str(&yaml);
    }
    output.push_str("---\n");
    output.push_str(body);
    Ok(output)
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"^#[ \t]+(.+?)(?:[ \t]+#+)?[ \t]*$").expect("valid heading regex"))
}

/// First level-1 ATX heading of a markdown body, ignoring fenced code blocks
pub fn first_heading(body: &str) -> Option<String> {
    let mut in_fence = false;
    for line in body.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = heading_regex().captures(line.trim_end()) {
            let text = caps[1].trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

/// File name without extension, used as the title of last resort
pub fn file_stem_title(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
        .unwrap_or_else(|| path.to_string())
}

/// Resolve a display title from document content.
///
/// Order: frontmatter `issue_title`, first level-1 heading, file name.
/// Malformed frontmatter is skipped rather than reported.
pub fn resolve_title(content: &str, path: &str) -> String {
    let (frontmatter, body) = match split_frontmatter(content) {
        Some((yaml, body)) => (parse_frontmatter(yaml).ok(), body),
        None => (None, content),
    };

    frontmatter
        .and_then(|fm| fm.issue_title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| file_stem_title(path))
}

/// Whether a path names a tracked document type
pub fn is_document_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(DOCUMENT_EXTENSION))
}
