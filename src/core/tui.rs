//! Terminal rendering for the `--format text` surface.

use colored::Colorize;
use std::env;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemStatus {
    Created,
    Updated,
    Removed,
    Unchanged,
    Skipped,
    Warning,
    Failed,
    Info,
}

impl ItemStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            ItemStatus::Created => "✨",
            ItemStatus::Updated => "🔄",
            ItemStatus::Removed => "🗑",
            ItemStatus::Unchanged => "➖",
            ItemStatus::Skipped => "⏭",
            ItemStatus::Warning => "⚠️",
            ItemStatus::Failed => "❌",
            ItemStatus::Info => "💡",
        }
    }
}

pub fn terminal_width() -> usize {
    env::var("TERM_WIDTH")
        .ok()
        .and_then(|w| w.parse().ok())
        .or_else(|| env::var("COLUMNS").ok().and_then(|c| c.parse().ok()))
        .unwrap_or(80)
}

/// Collapse whitespace and bound length for one terminal line.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{preview}...")
    } else {
        preview
    }
}

pub fn print_header(title: &str) {
    let rule = "─".repeat(terminal_width().clamp(20, 60));
    println!("{}", title.bright_cyan().bold());
    println!("{}", rule.bright_black());
}

pub fn print_section(title: &str) {
    println!();
    println!("  {}", title.bold());
}

pub fn print_item(item: &str, status: ItemStatus) {
    let icon = status.icon();
    let line = compact_line(item, terminal_width().saturating_sub(8).max(20));
    let icon = match status {
        ItemStatus::Created => icon.bright_green(),
        ItemStatus::Updated | ItemStatus::Warning => icon.bright_yellow(),
        ItemStatus::Removed | ItemStatus::Failed => icon.bright_red(),
        ItemStatus::Unchanged | ItemStatus::Skipped => icon.bright_black(),
        ItemStatus::Info => icon.cyan(),
    };
    println!("    {} {}", icon, line.bright_white());
}

pub fn print_error(kind: &str, detail: &str) {
    eprintln!("{} {} {}", "❌".bright_red(), kind.red().bold(), detail);
}
