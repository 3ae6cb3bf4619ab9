use crate::core::error::{Error, Result};
use pulldown_cmark::{Event, Parser, TagEnd};
use std::path::{Component, Path, PathBuf};

/// Directory names whose contents are never indexed
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "site-packages",
    "vendor",
    "get-pip",
    "node_modules",
    "dist",
    "build",
    "venv",
    "env",
    "target",
    "docker",
    "tmp",
];

/// Structured-data formats that embed poorly
const EXCLUDED_EXTENSIONS: &[&str] = &["css", "xml", "json", "yaml", "yml", "toml"];

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdown", "mkd", "mkdn"];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "rst", "org", "adoc", "tex", "log", "csv", "tsv", "html", "htm", "rs", "py",
    "js", "ts", "go", "c", "h", "cpp", "hpp", "java", "kt", "rb", "sh", "sql", "ini", "cfg",
];

/// Decides which files are indexed and turns them into text
pub trait Extractor: Send + Sync {
    fn is_indexable(&self, path: &Path) -> bool;

    /// Extract the text content of a file. Empty text yields zero chunks.
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Plain text and Markdown extractor
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    /// Excluded directory names are only matched below these roots
    roots: Vec<PathBuf>,
}

impl TextExtractor {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn in_excluded_dir(&self, path: &Path) -> bool {
        let relative = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);

        let parent = match relative.parent() {
            Some(parent) => parent,
            None => return false,
        };
        parent.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .map(|name| EXCLUDED_DIRS.contains(&name))
                .unwrap_or(false),
            _ => false,
        })
    }
}

impl Extractor for TextExtractor {
    fn is_indexable(&self, path: &Path) -> bool {
        if self.in_excluded_dir(path) {
            return false;
        }
        match extension(path) {
            Some(ext) if EXCLUDED_EXTENSIONS.contains(&ext.as_str()) => false,
            Some(ext) => {
                MARKDOWN_EXTENSIONS.contains(&ext.as_str()) || TEXT_EXTENSIONS.contains(&ext.as_str())
            }
            None => false,
        }
    }

    fn extract(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| Error::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let content = String::from_utf8(bytes).map_err(|e| Error::Unreadable {
            path: path.to_path_buf(),
            reason: format!("not valid UTF-8: {}", e),
        })?;

        if is_markdown_file(path) {
            Ok(markdown_to_text(&content))
        } else {
            Ok(content)
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file is a Markdown file based on extension
pub fn is_markdown_file(path: &Path) -> bool {
    extension(path)
        .map(|ext| MARKDOWN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Split YAML front matter delimited by `---` lines from the body
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            return (Some(&rest[..end]), &rest[end + 5..]);
        }
        if let Some(front) = rest.strip_suffix("\n---") {
            return (Some(front), "");
        }
    }
    (None, content)
}

/// Title and tags from front matter, rendered as leading lines of text
fn frontmatter_text(frontmatter: &str) -> String {
    let value: serde_yaml::Value = match serde_yaml::from_str(frontmatter) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Ignoring malformed front matter: {}", e);
            return String::new();
        }
    };
    let map = match value.as_mapping() {
        Some(map) => map,
        None => return String::new(),
    };

    let mut text = String::new();
    if let Some(title) = map.get("title").and_then(|v| v.as_str()) {
        text.push_str(title);
        text.push('\n');
    }

    let tags: Vec<String> = match map.get("tags") {
        Some(tags) if tags.is_sequence() => tags
            .as_sequence()
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        Some(tags) => tags
            .as_str()
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        None => Vec::new(),
    };
    if !tags.is_empty() {
        text.push_str("tags: ");
        text.push_str(&tags.join(", "));
        text.push('\n');
    }
    text
}

/// Flatten Markdown into plain text, one block per line
pub fn markdown_to_text(content: &str) -> String {
    let (frontmatter, body) = split_frontmatter(content);
    let mut text = frontmatter.map(frontmatter_text).unwrap_or_default();

    for event in Parser::new(body) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak => text.push(' '),
            Event::HardBreak => text.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::TableRow) => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }

    text.trim().to_string()
}
