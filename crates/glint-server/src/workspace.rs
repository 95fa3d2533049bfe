//! Open-document tracking and text synchronization.
//!
//! The workspace mirrors what the editor has open: documents arrive via
//! `textDocument/didOpen`, mutate via `didChange` (full replacement or
//! ranged incremental edits), and leave via `didClose`. Positions are
//! line/character pairs counted in characters.

use lsp_types::{Position, Range};
use std::collections::HashMap;

/// One open text document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    pub text: String,
}

impl Document {
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: i32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            version,
            text: text.into(),
        }
    }

    /// Lines including their terminators, which is what splicing needs.
    fn raw_lines(&self) -> Vec<&str> {
        self.text.split_inclusive('\n').collect()
    }

    /// A line without its terminator, if it exists.
    pub fn line(&self, index: usize) -> Option<&str> {
        self.text
            .split_inclusive('\n')
            .nth(index)
            .map(|l| l.trim_end_matches(['\r', '\n']))
    }

    pub fn line_count(&self) -> usize {
        self.text.split_inclusive('\n').count()
    }

    /// Range spanning the entire document, for whole-text edits.
    pub fn full_range(&self) -> Range {
        let end = match self.text.split_inclusive('\n').last() {
            Some(last) if last.ends_with('\n') => Position::new(self.line_count() as u32, 0),
            Some(last) => Position::new(
                self.line_count() as u32 - 1,
                last.chars().count() as u32,
            ),
            None => Position::new(0, 0),
        };
        Range::new(Position::new(0, 0), end)
    }

    /// Apply one content change: a missing range replaces the whole text,
    /// otherwise the range is spliced out and the new text written in. An
    /// edit starting at or past the last line appends.
    pub fn apply_change(&mut self, range: Option<Range>, new_text: &str) {
        let Some(range) = range else {
            self.text = new_text.to_string();
            return;
        };

        let lines = self.raw_lines();
        let start_line = range.start.line as usize;
        let end_line = range.end.line as usize;

        if start_line >= lines.len() {
            self.text.push_str(new_text);
            return;
        }

        let mut updated = String::with_capacity(self.text.len() + new_text.len());
        for (i, line) in lines.iter().enumerate() {
            if i < start_line || i > end_line {
                updated.push_str(line);
                continue;
            }
            if i == start_line {
                updated.push_str(char_prefix(line, range.start.character as usize));
                updated.push_str(new_text);
            }
            if i == end_line {
                updated.push_str(char_suffix(line, range.end.character as usize));
            }
        }
        self.text = updated;
    }

    /// The identifier-like word under the cursor.
    pub fn word_at(&self, position: Position) -> Option<String> {
        let line = self.line(position.line as usize)?;
        let chars: Vec<char> = line.chars().collect();
        let cursor = (position.character as usize).min(chars.len());

        let mut start = cursor;
        while start > 0 && is_word_char(chars[start - 1]) {
            start -= 1;
        }
        let mut end = cursor;
        while end < chars.len() && is_word_char(chars[end]) {
            end += 1;
        }

        if start == end {
            None
        } else {
            Some(chars[start..end].iter().collect())
        }
    }

    /// Every occurrence of `word` at word boundaries, as ranges.
    pub fn occurrences(&self, word: &str) -> Vec<Range> {
        let word_len = word.chars().count() as u32;
        let mut found = Vec::new();

        for (line_no, line) in self.text.lines().enumerate() {
            let chars: Vec<char> = line.chars().collect();
            let word_chars: Vec<char> = word.chars().collect();
            let mut col = 0;
            while col + word_chars.len() <= chars.len() {
                let matches = chars[col..col + word_chars.len()] == word_chars[..]
                    && (col == 0 || !is_word_char(chars[col - 1]))
                    && (col + word_chars.len() == chars.len()
                        || !is_word_char(chars[col + word_chars.len()]));
                if matches {
                    let start = Position::new(line_no as u32, col as u32);
                    let end = Position::new(line_no as u32, col as u32 + word_len);
                    found.push(Range::new(start, end));
                    col += word_chars.len();
                } else {
                    col += 1;
                }
            }
        }
        found
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Slice a line to the character column, clamping past-the-end columns.
fn char_prefix(line: &str, character: usize) -> &str {
    match line.char_indices().nth(character) {
        Some((byte, _)) => &line[..byte],
        None => line,
    }
}

fn char_suffix(line: &str, character: usize) -> &str {
    match line.char_indices().nth(character) {
        Some((byte, _)) => &line[byte..],
        None => "",
    }
}

/// The set of documents the editor currently has open.
#[derive(Debug, Default)]
pub struct Workspace {
    root_uri: Option<String>,
    documents: HashMap<String, Document>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_root_uri(&mut self, root_uri: Option<String>) {
        self.root_uri = root_uri;
    }

    pub fn root_uri(&self) -> Option<&str> {
        self.root_uri.as_deref()
    }

    pub fn open(&mut self, document: Document) {
        self.documents.insert(document.uri.clone(), document);
    }

    pub fn close(&mut self, uri: &str) -> Option<Document> {
        self.documents.remove(uri)
    }

    pub fn get(&self, uri: &str) -> Option<&Document> {
        self.documents.get(uri)
    }

    /// Apply a `didChange` batch in order and bump the version.
    pub fn update(
        &mut self,
        uri: &str,
        version: i32,
        changes: impl IntoIterator<Item = (Option<Range>, String)>,
    ) -> bool {
        let Some(document) = self.documents.get_mut(uri) else {
            return false;
        };
        for (range, text) in changes {
            document.apply_change(range, &text);
        }
        document.version = version;
        true
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
