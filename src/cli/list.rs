//! `lifelog list`: the forest as a text tree

use std::io::IsTerminal;

use anyhow::{Context, Result};

use super::output::Output;
use super::tui::{layout, search};
use crate::data::LogManager;
use crate::domain::EntryView;
use crate::storage::Services;

const STRIKE: &str = "\x1b[9m";
const RESET: &str = "\x1b[0m";

/// Options of the list command
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Keep sub-trees with an entry containing this text
    pub include: Option<String>,
    /// Reload this entry's subtree including history
    pub toggle: Option<i64>,
    pub show_id: bool,
}

/// Renders `forest` one line per entry
pub fn render_lines(forest: &[EntryView], show_id: bool, strike_done: bool) -> Vec<String> {
    layout::flatten(forest, true)
        .iter()
        .map(|item| {
            let view = item.view;
            let mut line = format!("{}{} ", item.prefix(), item.glyph());
            if show_id {
                line.push_str(&format!("#{} ", view.id()));
            }
            if view.data.done && strike_done {
                line.push_str(&format!("{}{}{}", STRIKE, view.data.text, RESET));
            } else {
                line.push_str(&view.data.text);
            }
            if !view.notes.is_empty() {
                line.push_str(&format!(" [{}]", view.notes.len()));
            }
            line
        })
        .collect()
}

/// Loads the forest the way the options ask for
pub fn load(services: &Services, opts: &ListOptions) -> Result<Vec<EntryView>> {
    let mut log = LogManager::new(services);
    log.init(false).context("Failed to load entries")?;
    if let Some(id) = opts.toggle {
        log.toggle_history(id)
            .with_context(|| format!("Failed to load history of entry {}", id))?;
    }

    let mut forest = log.entries().to_vec();
    if let Some(pattern) = opts.include.as_deref().filter(|p| !p.is_empty()) {
        forest = search::filter_entries(&forest, &|v: &EntryView| v.data.matches_filter(pattern));
    }
    Ok(forest)
}

pub fn run(output: &Output, services: &Services, opts: &ListOptions) -> Result<()> {
    output.verbose_ctx("list", &format!("Listing entries: {:?}", opts));
    let forest = load(services, opts)?;
    output.verbose_ctx("list", &format!("{} top-level entries", forest.len()));

    if output.is_json() {
        output.data(&forest);
        return Ok(());
    }

    if forest.is_empty() {
        println!("No entries");
        return Ok(());
    }
    let strike = std::io::stdout().is_terminal();
    for line in render_lines(&forest, opts.show_id, strike) {
        println!("{}", line);
    }
    Ok(())
}
