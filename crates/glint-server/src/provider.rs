//! Pluggable analysis backends.
//!
//! The server owns protocol plumbing only; everything language-aware lives
//! behind [`LanguageProvider`]. Every method defaults to "no answer", so a
//! backend implements just the capabilities it has.

use crate::config::Settings;
use crate::workspace::Document;
use async_trait::async_trait;
use lsp_types::{
    CompletionItem, CompletionItemKind, Diagnostic, DiagnosticSeverity, DocumentSymbol, Hover,
    HoverContents, MarkedString, Position, Range, TextEdit, WorkspaceEdit,
};
use std::collections::HashMap;
use std::str::FromStr;

/// An analysis backend. Methods receive a snapshot of the document, so
/// implementations may take their time without blocking text sync.
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    async fn diagnostics(&self, _document: &Document, _settings: &Settings) -> Vec<Diagnostic> {
        Vec::new()
    }

    async fn hover(&self, _document: &Document, _position: Position) -> Option<Hover> {
        None
    }

    async fn completions(&self, _document: &Document, _position: Position) -> Vec<CompletionItem> {
        Vec::new()
    }

    async fn definition(&self, _document: &Document, _position: Position) -> Vec<Range> {
        Vec::new()
    }

    async fn references(
        &self,
        _document: &Document,
        _position: Position,
        _include_declaration: bool,
    ) -> Vec<Range> {
        Vec::new()
    }

    async fn document_symbols(&self, _document: &Document) -> Vec<DocumentSymbol> {
        Vec::new()
    }

    /// Full formatted text, or `None` when the document is already clean.
    async fn format(&self, _document: &Document, _settings: &Settings) -> Option<String> {
        None
    }

    async fn rename(
        &self,
        _document: &Document,
        _position: Position,
        _new_name: &str,
    ) -> Option<WorkspaceEdit> {
        None
    }
}

/// A backend that ignores every request. Useful as a placeholder and in
/// transport-level tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvider;

#[async_trait]
impl LanguageProvider for NoopProvider {}

/// Word-level analysis over plain text: no parsing, just the document's
/// own vocabulary. Small enough to be self-contained, real enough to
/// exercise every provider seam.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordProvider;

impl WordProvider {
    fn words(document: &Document) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for line in document.text.lines() {
            for word in line.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
                if !word.is_empty() && !words.iter().any(|w| w == word) {
                    words.push(word.to_string());
                }
            }
        }
        words
    }
}

#[async_trait]
impl LanguageProvider for WordProvider {
    /// Flag lines exceeding the configured length, the classic style check.
    async fn diagnostics(&self, document: &Document, settings: &Settings) -> Vec<Diagnostic> {
        let limit = settings.max_line_length;
        let mut diagnostics = Vec::new();

        for (line_no, line) in document.text.lines().enumerate() {
            let length = line.chars().count() as u32;
            if length > limit {
                diagnostics.push(Diagnostic {
                    range: Range::new(
                        Position::new(line_no as u32, limit),
                        Position::new(line_no as u32, length),
                    ),
                    severity: Some(DiagnosticSeverity::WARNING),
                    source: Some("glint".to_string()),
                    message: format!("line too long ({} > {} characters)", length, limit),
                    ..Diagnostic::default()
                });
            }
        }
        diagnostics
    }

    async fn hover(&self, document: &Document, position: Position) -> Option<Hover> {
        let word = document.word_at(position)?;
        let count = document.occurrences(&word).len();
        Some(Hover {
            contents: HoverContents::Scalar(MarkedString::String(format!(
                "`{}`: {} occurrence{} in this document",
                word,
                count,
                if count == 1 { "" } else { "s" }
            ))),
            range: None,
        })
    }

    async fn completions(&self, document: &Document, position: Position) -> Vec<CompletionItem> {
        // The word fragment left of the cursor is the prefix to complete.
        let prefix = Position::new(position.line, position.character.saturating_sub(1));
        let prefix = match document.word_at(prefix) {
            Some(word) => word,
            None => return Vec::new(),
        };

        Self::words(document)
            .into_iter()
            .filter(|w| w.starts_with(&prefix) && *w != prefix)
            .map(|w| CompletionItem {
                label: w,
                kind: Some(CompletionItemKind::TEXT),
                ..CompletionItem::default()
            })
            .collect()
    }

    /// First occurrence stands in for a definition in plain text.
    async fn definition(&self, document: &Document, position: Position) -> Vec<Range> {
        let Some(word) = document.word_at(position) else {
            return Vec::new();
        };
        document.occurrences(&word).into_iter().take(1).collect()
    }

    async fn references(
        &self,
        document: &Document,
        position: Position,
        include_declaration: bool,
    ) -> Vec<Range> {
        let Some(word) = document.word_at(position) else {
            return Vec::new();
        };
        let mut occurrences = document.occurrences(&word);
        if !include_declaration && !occurrences.is_empty() {
            occurrences.remove(0);
        }
        occurrences
    }

    /// Strip trailing whitespace and guarantee a final newline.
    async fn format(&self, document: &Document, _settings: &Settings) -> Option<String> {
        let mut formatted = String::with_capacity(document.text.len());
        for line in document.text.lines() {
            formatted.push_str(line.trim_end());
            formatted.push('\n');
        }
        if formatted == document.text {
            None
        } else {
            Some(formatted)
        }
    }

    async fn rename(
        &self,
        document: &Document,
        position: Position,
        new_name: &str,
    ) -> Option<WorkspaceEdit> {
        let word = document.word_at(position)?;
        let edits: Vec<TextEdit> = document
            .occurrences(&word)
            .into_iter()
            .map(|range| TextEdit::new(range, new_name.to_string()))
            .collect();
        if edits.is_empty() {
            return None;
        }

        let uri = lsp_types::Uri::from_str(&document.uri).ok()?;
        let mut changes = HashMap::new();
        changes.insert(uri, edits);
        Some(WorkspaceEdit {
            changes: Some(changes),
            ..WorkspaceEdit::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("file:///demo.txt", "plaintext", 1, text)
    }

    #[tokio::test]
    async fn test_noop_provider_answers_nothing() {
        let d = doc("anything at all\n");
        let p = NoopProvider;
        assert!(p.diagnostics(&d, &Settings::default()).await.is_empty());
        assert!(p.hover(&d, Position::new(0, 0)).await.is_none());
        assert!(p.completions(&d, Position::new(0, 3)).await.is_empty());
    }

    #[tokio::test]
    async fn test_long_line_diagnostic() {
        let settings = Settings {
            max_line_length: 10,
            ..Settings::default()
        };
        let d = doc("short\na line that is clearly too long\n");
        let diags = WordProvider.diagnostics(&d, &settings).await;

        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].range.start, Position::new(1, 10));
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::WARNING));
        assert!(diags[0].message.contains("line too long"));
    }

    #[tokio::test]
    async fn test_hover_counts_occurrences() {
        let d = doc("alpha beta\nalpha gamma\n");
        let hover = WordProvider.hover(&d, Position::new(0, 1)).await.unwrap();
        match hover.contents {
            HoverContents::Scalar(MarkedString::String(s)) => {
                assert!(s.contains("`alpha`"));
                assert!(s.contains("2 occurrences"));
            }
            other => panic!("unexpected hover contents: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completions_match_prefix() {
        let d = doc("apple apricot banana\napr\n");
        let items = WordProvider.completions(&d, Position::new(1, 3)).await;
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["apricot"]);
    }

    #[tokio::test]
    async fn test_references_without_declaration() {
        let d = doc("x y\nx z\nx\n");
        let all = WordProvider
            .references(&d, Position::new(0, 0), true)
            .await;
        assert_eq!(all.len(), 3);
        let tail = WordProvider
            .references(&d, Position::new(0, 0), false)
            .await;
        assert_eq!(tail.len(), 2);
    }

    #[tokio::test]
    async fn test_format_trims_trailing_whitespace() {
        let d = doc("hello   \nworld");
        let formatted = WordProvider
            .format(&d, &Settings::default())
            .await
            .unwrap();
        assert_eq!(formatted, "hello\nworld\n");

        let clean = doc("hello\nworld\n");
        assert!(WordProvider
            .format(&clean, &Settings::default())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_rename_edits_every_occurrence() {
        let d = doc("foo bar\nfoo\n");
        let edit = WordProvider
            .rename(&d, Position::new(0, 1), "qux")
            .await
            .unwrap();
        let changes = edit.changes.unwrap();
        let edits = changes.values().next().unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits.iter().all(|e| e.new_text == "qux"));
    }
}
