//! Prompt-oriented rendering of source files.
//!
//! These renderers only produce text fragments for LLM prompts; they never
//! touch the disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Solution, SourceFile};

/// Rendering style for a source file in a prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatStyle {
    /// Path line followed by a fenced code block tagged with the extension.
    #[default]
    Markdown,
    /// `<file path='...'>` wrapper.
    Xml,
    /// `File: ...` header followed by the raw content.
    Plain,
}

/// Options for [`SourceFile::format_with`] and [`Solution::format_with`].
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    pub style: FormatStyle,

    /// Prefix each line with a right-aligned 1-based line number.
    pub line_numbers: bool,

    /// Keep only the first N lines, appending a `... (N more lines)`
    /// truncation notice.
    pub max_lines: Option<usize>,

    /// Display paths relative to this directory when they are inside it.
    pub relative_to: Option<PathBuf>,
}

impl SourceFile {
    /// Default markdown rendering.
    pub fn formatted(&self) -> String {
        self.format_with(&FormatOptions::default())
    }

    /// Render the file for inclusion in a prompt.
    pub fn format_with(&self, options: &FormatOptions) -> String {
        let mut content = self.content.clone();

        if let Some(max) = options.max_lines {
            let total = self.content.lines().count();
            if total > max {
                let kept: Vec<&str> = self.content.lines().take(max).collect();
                content = format!("{}\n... ({} more lines)", kept.join("\n"), total - max);
            }
        }

        if options.line_numbers {
            content = content
                .lines()
                .enumerate()
                .map(|(i, line)| format!("{:4} | {line}", i + 1))
                .collect::<Vec<_>>()
                .join("\n");
        }

        let shown_path = display_path(self.path(), options.relative_to.as_deref());
        match options.style {
            FormatStyle::Markdown => {
                format!("{}\n```{}\n{}\n```", shown_path, self.extension(), content)
            }
            FormatStyle::Xml => format!("<file path='{shown_path}'>\n{content}\n</file>"),
            FormatStyle::Plain => format!("File: {shown_path}\n{content}"),
        }
    }
}

impl Solution {
    /// Bullet list of all file paths.
    pub fn files_list_formatted(&self) -> String {
        self.files()
            .iter()
            .map(|f| format!("- {}", f.path().display()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Default markdown rendering of every file.
    pub fn formatted(&self) -> String {
        self.format_with(&FormatOptions::default(), "\n\n---\n\n")
    }

    /// Render every file, joined by `separator`.
    pub fn format_with(&self, options: &FormatOptions, separator: &str) -> String {
        self.files()
            .iter()
            .map(|f| f.format_with(options))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

fn display_path(path: &Path, relative_to: Option<&Path>) -> String {
    match relative_to.and_then(|base| path.strip_prefix(base).ok()) {
        Some(relative) => relative.display().to_string(),
        None => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceFile {
        SourceFile::new("/tmp/proj/a.c", "int main() {\n  return 0;\n}").unwrap()
    }

    #[test]
    fn markdown_fences_with_extension() {
        let formatted = sample().formatted();
        assert!(formatted.starts_with("/tmp/proj/a.c\n```c\n"));
        assert!(formatted.ends_with("\n```"));
    }

    #[test]
    fn xml_wraps_with_path() {
        let formatted = sample().format_with(&FormatOptions {
            style: FormatStyle::Xml,
            ..Default::default()
        });
        assert!(formatted.starts_with("<file path='/tmp/proj/a.c'>"));
        assert!(formatted.ends_with("</file>"));
    }

    #[test]
    fn plain_has_file_header() {
        let formatted = sample().format_with(&FormatOptions {
            style: FormatStyle::Plain,
            ..Default::default()
        });
        assert!(formatted.starts_with("File: /tmp/proj/a.c\n"));
    }

    #[test]
    fn line_numbers_are_one_based() {
        let formatted = sample().format_with(&FormatOptions {
            line_numbers: true,
            ..Default::default()
        });
        assert!(formatted.contains("   1 | int main() {"));
        assert!(formatted.contains("   2 |   return 0;"));
    }

    #[test]
    fn truncation_appends_notice() {
        let file = SourceFile::new("/tmp/long.c", "a\nb\nc\nd\ne").unwrap();
        let formatted = file.format_with(&FormatOptions {
            style: FormatStyle::Plain,
            max_lines: Some(2),
            ..Default::default()
        });
        assert!(formatted.contains("a\nb\n... (3 more lines)"));
        assert!(!formatted.contains("\nc\n"));
    }

    #[test]
    fn relative_path_display() {
        let formatted = sample().format_with(&FormatOptions {
            style: FormatStyle::Plain,
            relative_to: Some(PathBuf::from("/tmp/proj")),
            ..Default::default()
        });
        assert!(formatted.starts_with("File: a.c\n"));
    }
}
