//
// rename/engine.rs
//
// Rename edit computation: the compiler-side collaborator boundary
//

use anyhow::{anyhow, Context};
use regex::Regex;
use tower_lsp::lsp_types::{Position, Range, TextEdit, Url};

use super::{ChangeRecord, RenameEntry, RenameFileRecord};

/// Computes a rename's document edits and file operations.
///
/// The language server consumes only this output contract; everything about
/// how edits are derived belongs to the implementation behind the trait.
pub trait RenameEngine: Send + Sync {
    /// Validate that `position` sits on a renameable symbol and return its
    /// range plus placeholder text.
    fn prepare(&self, text: &str, position: Position) -> Option<(Range, String)>;

    /// Compute the change records for renaming the symbol at `position` in
    /// the document identified by `uri`. `docs` is the full content snapshot
    /// of the workspace, open documents authoritative.
    fn rename(
        &self,
        docs: &[(Url, String)],
        uri: &Url,
        position: Position,
        new_name: &str,
    ) -> anyhow::Result<Vec<ChangeRecord>>;
}

/// Word-boundary textual rename over the workspace snapshot.
///
/// Sable modules are dotted CamelCase names declared with `module Foo.Bar`
/// and conventionally live in a file named after the lowercased last
/// segment. Renaming the declaring module also renames its file.
#[derive(Debug, Default)]
pub struct TextualRenameEngine;

impl TextualRenameEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RenameEngine for TextualRenameEngine {
    fn prepare(&self, text: &str, position: Position) -> Option<(Range, String)> {
        word_at(text, position)
    }

    fn rename(
        &self,
        docs: &[(Url, String)],
        uri: &Url,
        position: Position,
        new_name: &str,
    ) -> anyhow::Result<Vec<ChangeRecord>> {
        if new_name.is_empty() {
            return Err(anyhow!("new name must not be empty"));
        }
        let (_, text) = docs
            .iter()
            .find(|(doc_uri, _)| doc_uri == uri)
            .ok_or_else(|| anyhow!("unknown document: {}", uri))?;
        let (_, subject) = word_at(text, position)
            .ok_or_else(|| anyhow!("no renameable symbol at {:?}", position))?;

        // Keep the longest shared dotted prefix in place; the edit covers
        // only the trailing segments that actually change.
        let (keep, replacement) = split_common_prefix(&subject, new_name);
        let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&subject)))
            .context("building rename pattern")?;

        let mut records = Vec::new();
        let mut next_id = 0u64;
        for (doc_uri, doc_text) in docs {
            let entries = collect_entries(doc_uri, doc_text, &pattern, keep, &mut next_id);
            if entries.is_empty() {
                continue;
            }
            let edits: Vec<TextEdit> = entries
                .iter()
                .map(|entry| TextEdit {
                    range: entry.edit_range,
                    new_text: replacement.clone(),
                })
                .collect();
            let rename_file = module_file_rename(doc_uri, doc_text, &subject, new_name);
            records.push(ChangeRecord {
                uri: doc_uri.clone(),
                edits,
                rename_file,
            });
        }

        if records.is_empty() {
            return Err(anyhow!("no occurrences of '{}' found", subject));
        }
        Ok(records)
    }
}

/// Collect one rename entry per word-boundary occurrence in a document.
fn collect_entries(
    uri: &Url,
    text: &str,
    pattern: &Regex,
    keep: usize,
    next_id: &mut u64,
) -> Vec<RenameEntry> {
    let mut entries = Vec::new();
    for (line_idx, line) in text.lines().enumerate() {
        for found in pattern.find_iter(line) {
            let start = utf16_col(line, found.start());
            let end = utf16_col(line, found.end());
            let node_range = Range {
                start: Position {
                    line: line_idx as u32,
                    character: start,
                },
                end: Position {
                    line: line_idx as u32,
                    character: end,
                },
            };
            let edit_range = Range {
                start: Position {
                    line: line_idx as u32,
                    character: start + keep as u32,
                },
                end: node_range.end,
            };
            *next_id += 1;
            entries.push(RenameEntry {
                id: *next_id,
                path: uri.clone(),
                subject: found.as_str().to_string(),
                block_range: None,
                node_range,
                edit_range,
            });
        }
    }
    entries
}

/// The dotted identifier containing `position`, with its UTF-16 range.
fn word_at(text: &str, position: Position) -> Option<(Range, String)> {
    let line = text.lines().nth(position.line as usize)?;
    let target = position.character as usize;

    let mut col = 0usize;
    let mut word_start = 0usize;
    let mut word = String::new();
    let mut range: Option<(usize, usize, String)> = None;
    for ch in line.chars().chain(std::iter::once(' ')) {
        let is_word = ch.is_alphanumeric() || ch == '_' || ch == '.';
        if is_word {
            if word.is_empty() {
                word_start = col;
            }
            word.push(ch);
        } else if !word.is_empty() {
            // The cursor may sit anywhere in the word, including one past it
            if word_start <= target && target <= col {
                range = Some((word_start, col, word.clone()));
                break;
            }
            word.clear();
        }
        col += ch.len_utf16();
    }

    let (start, end, word) = range?;
    if word.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((
        Range {
            start: Position {
                line: position.line,
                character: start as u32,
            },
            end: Position {
                line: position.line,
                character: end as u32,
            },
        },
        word,
    ))
}

/// Longest shared leading dotted segments of `subject` and `new_name`.
///
/// Returns the kept prefix length of `subject` in UTF-16 code units
/// (including the trailing dot) and the replacement text for the remainder.
fn split_common_prefix(subject: &str, new_name: &str) -> (usize, String) {
    let old_segments: Vec<&str> = subject.split('.').collect();
    let new_segments: Vec<&str> = new_name.split('.').collect();

    let mut shared = 0;
    // Never share every segment: an identical name is still a full edit
    let limit = old_segments.len().min(new_segments.len()).saturating_sub(1);
    while shared < limit && old_segments[shared] == new_segments[shared] {
        shared += 1;
    }

    let keep: usize = old_segments[..shared]
        .iter()
        .map(|segment| segment.encode_utf16().count() + 1)
        .sum();
    let replacement = new_segments[shared..].join(".");
    (keep, replacement)
}

/// File rename record when the renamed module is declared in this document
/// and the file follows the lowercased-last-segment naming convention.
fn module_file_rename(
    uri: &Url,
    text: &str,
    subject: &str,
    new_name: &str,
) -> Option<RenameFileRecord> {
    let declares = text
        .lines()
        .any(|line| line.trim_start().strip_prefix("module ").map(str::trim) == Some(subject));
    if !declares {
        return None;
    }

    let old_stem = subject.rsplit('.').next()?.to_lowercase();
    let new_stem = new_name.rsplit('.').next()?.to_lowercase();
    if old_stem == new_stem {
        return None;
    }

    let path = uri.to_file_path().ok()?;
    if path.file_stem()?.to_str()? != old_stem {
        return None;
    }
    let new_path = path.with_file_name(format!("{}.sbl", new_stem));
    let new_uri = Url::from_file_path(new_path).ok()?;
    Some(RenameFileRecord {
        old_uri: uri.clone(),
        new_uri,
    })
}

/// UTF-16 column of a byte offset within a line.
fn utf16_col(line: &str, byte_offset: usize) -> u32 {
    line[..byte_offset].encode_utf16().count() as u32
}
