//! Open editor documents.

use std::collections::HashMap;

use lsp_types::{Position, TextDocumentContentChangeEvent, Url};
use parking_lot::RwLock;

/// Byte offset of an LSP position. `character` counts UTF-16 code units;
/// positions past the end of a line or the text clamp to that end.
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);

    let mut units = 0u32;
    for (i, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return line_start + i;
        }
        units += ch.len_utf16() as u32;
    }
    line_end
}

/// Apply one change: a ranged edit, or a full replacement when `range` is absent.
pub fn apply_change(text: &mut String, change: &TextDocumentContentChangeEvent) {
    match change.range {
        None => *text = change.text.clone(),
        Some(range) => {
            let start = offset_at(text, range.start);
            let end = offset_at(text, range.end).max(start);
            text.replace_range(start..end, &change.text);
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<HashMap<Url, String>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: Url, text: String) {
        self.documents.write().insert(uri, text);
    }

    pub fn close(&self, uri: &Url) -> Option<String> {
        self.documents.write().remove(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<String> {
        self.documents.read().get(uri).cloned()
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.read().contains_key(uri)
    }

    /// Apply `changes` in order and return the new text, or `None` if
    /// `uri` is not open.
    pub fn apply_changes(
        &self,
        uri: &Url,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Option<String> {
        let mut documents = self.documents.write();
        let text = documents.get_mut(uri)?;
        for change in changes {
            apply_change(text, change);
        }
        Some(text.clone())
    }
}
