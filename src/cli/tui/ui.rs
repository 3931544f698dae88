//! Terminal setup and painting of the document tree
//!
//! Block nodes (`div`, `li`, `h1`, `br`) start a new line; `text` and
//! `input` nodes are inline. Styles inherit down the tree, and the focused
//! input places the terminal cursor.

use std::io::{self, stdout, Stdout};

use anyhow::Result;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::dom::{Node, NodeKind};

/// Terminal type alias
pub type Terminal = ratatui::Terminal<CrosstermBackend<Stdout>>;

/// Initialize the terminal for TUI mode
pub fn init_terminal() -> Result<Terminal> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = ratatui::Terminal::new(backend)?;
    Ok(terminal)
}

/// Restore the terminal to normal mode
pub fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;
    Ok(())
}

/// Lines of a painted document plus the cursor cell, if any
#[derive(Debug, Default)]
pub struct Painted {
    pub lines: Vec<Line<'static>>,
    /// `(column, line)` of the focused input's cursor
    pub cursor: Option<(usize, usize)>,
}

#[derive(Default)]
struct Painter {
    lines: Vec<Line<'static>>,
    current: Vec<Span<'static>>,
    cursor: Option<(usize, usize)>,
}

impl Painter {
    fn width(&self) -> usize {
        self.current.iter().map(|s| s.width()).sum()
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.current)));
        }
    }

    fn paint(&mut self, node: &Node, inherited: Style) {
        let style = inherited.patch(node.props.style);
        match node.kind {
            NodeKind::Text | NodeKind::Span | NodeKind::Fragment => {
                if !node.text.is_empty() {
                    self.current.push(Span::styled(node.text.clone(), style));
                }
                for child in &node.children {
                    self.paint(child, style);
                }
            }
            NodeKind::Input => self.paint_input(node, style),
            NodeKind::Br => {
                self.flush();
                self.lines.push(Line::default());
            }
            NodeKind::Ul => {
                self.flush();
                for child in &node.children {
                    self.paint(child, style);
                }
            }
            NodeKind::Div | NodeKind::Li | NodeKind::H1 => {
                self.flush();
                if let Some(prefix) = &node.props.item_prefix {
                    self.current
                        .push(Span::styled(prefix.clone(), Style::default().fg(Color::DarkGray)));
                }
                if !node.text.is_empty() {
                    let style = if node.kind == NodeKind::H1 {
                        style.add_modifier(Modifier::BOLD)
                    } else {
                        style
                    };
                    self.current.push(Span::styled(node.text.clone(), style));
                }
                for child in &node.children {
                    self.paint(child, style);
                }
                self.flush();
            }
        }
    }

    fn paint_input(&mut self, node: &Node, style: Style) {
        let value = node.text.as_str();
        if node.props.focused {
            let cursor = node.props.cursor.unwrap_or(0);
            let before: String = value.chars().take(cursor).collect();
            let column = self.width() + Span::raw(before).width();
            self.cursor = Some((column, self.lines.len()));
        }
        if value.is_empty() {
            if let Some(placeholder) = &node.props.placeholder {
                self.current.push(Span::styled(
                    placeholder.clone(),
                    Style::default().fg(Color::DarkGray),
                ));
            }
        } else {
            self.current.push(Span::styled(value.to_string(), style));
        }
    }
}

/// Lays `root` out as styled lines
pub fn paint(root: &Node) -> Painted {
    let mut painter = Painter::default();
    painter.paint(root, Style::default());
    painter.flush();
    Painted {
        lines: painter.lines,
        cursor: painter.cursor,
    }
}

/// Draws `root` into the frame, scrolling to keep the cursor on screen
pub fn draw(frame: &mut Frame, root: &Node) {
    let area = frame.area();
    let painted = paint(root);

    let height = area.height as usize;
    let offset = match painted.cursor {
        Some((_, line)) if height > 0 && line >= height => line + 1 - height,
        _ => 0,
    };

    frame.render_widget(
        Paragraph::new(painted.lines).scroll((offset as u16, 0)),
        area,
    );

    if let Some((column, line)) = painted.cursor {
        let x = area.x.saturating_add(column.min(u16::MAX as usize) as u16);
        let y = area.y.saturating_add((line - offset) as u16);
        if x < area.right() && y < area.bottom() {
            frame.set_cursor_position((x, y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tui::dom::Target;

    fn line_text(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn blocks_break_lines_and_prefix_rows() {
        let root = Node::div(vec![
            Node::h1("Title"),
            Node::ul(vec![
                Node::li(vec![Node::text("• a")]),
                Node::li(vec![Node::text("• b")]).with_prefix("  └─"),
            ]),
        ]);
        let painted = paint(&root);
        let lines: Vec<String> = painted.lines.iter().map(line_text).collect();
        assert_eq!(lines, vec!["Title", "• a", "  └─• b"]);
    }

    #[test]
    fn cursor_follows_focused_input() {
        let root = Node::div(vec![
            Node::div(vec![Node::text("status")]),
            Node::div(vec![
                Node::text("> "),
                Node::input("héllo", 2, true, Target::GlobalInput),
            ]),
        ]);
        let painted = paint(&root);
        assert_eq!(painted.cursor, Some((4, 1)));
    }

    #[test]
    fn empty_input_shows_placeholder() {
        let root = Node::div(vec![
            Node::input("", 0, false, Target::GlobalInput).with_placeholder("type here"),
        ]);
        let painted = paint(&root);
        assert_eq!(line_text(&painted.lines[0]), "type here");
        assert_eq!(painted.cursor, None);
    }

    #[test]
    fn nested_block_inside_item_gets_own_line() {
        let root = Node::li(vec![
            Node::text("• parent"),
            Node::div(vec![Node::text("Delete this entry?")]).with_prefix("  "),
        ]);
        let lines: Vec<String> = paint(&root).lines.iter().map(line_text).collect();
        assert_eq!(lines, vec!["• parent", "  Delete this entry?"]);
    }
}
