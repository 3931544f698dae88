//! Export and import of the entry forest
//!
//! The document is `{"entries": [{"data": Entry, "notes": [{"data": Note}],
//! "children": [...]}]}`. Import also accepts a flat list where children
//! refer to their parent through `data.parent_id`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::output::Output;
use crate::data::LogManager;
use crate::domain::{Entry, EntryListOptions, EntryView, Note};
use crate::storage::Services;

#[derive(Serialize)]
struct ExportDocument<'a> {
    entries: &'a [EntryView],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportDocument {
    entries: Vec<ImportEntry>,
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    data: Entry,
    #[serde(default)]
    notes: Vec<ImportNote>,
    #[serde(default)]
    children: Vec<ImportEntry>,
}

#[derive(Debug, Deserialize)]
struct ImportNote {
    data: Note,
}

/// Counts reported by [`import_file`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

fn count(forest: &[EntryView]) -> usize {
    forest.iter().map(|v| 1 + count(&v.children)).sum()
}

/// Writes `forest` to `path`, returning the number of entries written
pub fn write_export(path: &Path, forest: &[EntryView]) -> Result<usize> {
    let json = serde_json::to_string_pretty(&ExportDocument { entries: forest })
        .context("Failed to serialize export")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(count(forest))
}

/// Exports every entry, history included
pub fn export_file(services: &Services, path: &Path) -> Result<usize> {
    let mut log = LogManager::new(services);
    log.init(true).context("Failed to load entries")?;
    let written = write_export(path, log.entries())?;
    tracing::info!(path = %path.display(), entries = written, "exported");
    Ok(written)
}

/// Re-nests a flat export using `parent_id` links
fn nest(entries: Vec<ImportEntry>) -> Vec<ImportEntry> {
    let ids: HashSet<i64> = entries
        .iter()
        .map(|e| e.data.id)
        .filter(|id| *id != 0)
        .collect();

    let mut roots = Vec::new();
    let mut by_parent: HashMap<i64, Vec<ImportEntry>> = HashMap::new();
    for entry in entries {
        let parent = entry.data.parent_id;
        if parent != 0 && parent != entry.data.id && ids.contains(&parent) {
            by_parent.entry(parent).or_default().push(entry);
        } else {
            roots.push(entry);
        }
    }

    fn attach(entry: &mut ImportEntry, by_parent: &mut HashMap<i64, Vec<ImportEntry>>) {
        if let Some(children) = by_parent.remove(&entry.data.id) {
            entry.children.extend(children);
        }
        for child in &mut entry.children {
            attach(child, by_parent);
        }
    }

    for root in &mut roots {
        attach(root, &mut by_parent);
    }
    roots
}

fn import_entry(services: &Services, entry: ImportEntry, parent_id: i64) -> Result<usize> {
    let ImportEntry {
        data,
        notes,
        children,
    } = entry;

    let text = data.text.trim().to_string();
    let mut record = Entry {
        id: 0,
        parent_id,
        text: text.clone(),
        ..data
    };
    record.stamp_defaults(Utc::now());
    let id = services
        .entries
        .add(record)
        .with_context(|| format!("Failed to import entry '{}'", text))?;

    for note in notes {
        let mut note = Note {
            id: 0,
            entry_id: id,
            ..note.data
        };
        note.stamp_defaults(Utc::now());
        services
            .notes
            .add(id, note)
            .with_context(|| format!("Failed to import note of entry {}", id))?;
    }

    let mut imported = 1;
    for child in children {
        imported += import_entry(services, child, id)?;
    }
    Ok(imported)
}

fn count_import(entry: &ImportEntry) -> usize {
    1 + entry.children.iter().map(count_import).sum::<usize>()
}

/// Recreates the forest in `path`; top-level duplicates by trimmed text are skipped
pub fn import_file(services: &Services, path: &Path) -> Result<ImportSummary> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let doc: ImportDocument = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let (existing, _) = services
        .entries
        .list(&EntryListOptions::all(true))
        .context("Failed to list existing entries")?;
    let mut seen: HashSet<String> = existing
        .iter()
        .filter(|e| e.parent_id == 0)
        .map(|e| e.text.trim().to_string())
        .collect();

    let mut summary = ImportSummary::default();
    for entry in nest(doc.entries) {
        let text = entry.data.text.trim().to_string();
        if text.is_empty() || seen.contains(&text) {
            tracing::debug!(text = %text, "skipping duplicate");
            summary.skipped += count_import(&entry);
            continue;
        }
        seen.insert(text);
        summary.imported += import_entry(services, entry, 0)?;
    }

    tracing::info!(
        path = %path.display(),
        imported = summary.imported,
        skipped = summary.skipped,
        "imported"
    );
    Ok(summary)
}

/// `lifelog export <file>`
pub fn run_export(output: &Output, services: &Services, path: &Path) -> Result<()> {
    output.verbose_ctx("export", &format!("Writing {}", path.display()));
    let written = export_file(services, path)?;
    if output.is_json() {
        output.data(&serde_json::json!({
            "exported": written,
            "file": path.display().to_string(),
        }));
    } else {
        output.success(&format!("Exported {} entries to {}", written, path.display()));
    }
    Ok(())
}

/// `lifelog import <file>`
pub fn run_import(output: &Output, services: &Services, path: &Path) -> Result<()> {
    output.verbose_ctx("import", &format!("Reading {}", path.display()));
    let summary = import_file(services, path)?;
    if output.is_json() {
        output.data(&serde_json::json!({
            "imported": summary.imported,
            "skipped": summary.skipped,
            "file": path.display().to_string(),
        }));
    } else {
        output.success(&format!(
            "Imported {} entries, skipped {} duplicates from {}",
            summary.imported,
            summary.skipped,
            path.display()
        ));
    }
    Ok(())
}
