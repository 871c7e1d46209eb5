use std::io::{self, IsTerminal, Write};

use anyhow::Context;
use unicode_width::UnicodeWidthStr;

use crate::card::{RenderPlan, RenderSurface};
use crate::config::CardConfig;

const CLOSED_MARK: &str = "[x]";
const OPEN_MARK: &str = "[ ]";
const INPUT_PLACEHOLDER: &str = "[ new task... ]";

/// Terminal rendition of the card.
#[derive(Debug, Clone)]
pub struct TextSurface {
    color: bool,
}

impl TextSurface {
    pub fn new(cfg: &CardConfig) -> Self {
        Self {
            color: cfg.color && io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(projects = plan.projects.len()))]
    pub fn render(&self, plan: &RenderPlan) -> anyhow::Result<String> {
        let mut out = Vec::new();
        self.write_plan(&mut out, plan)?;
        String::from_utf8(out).context("rendered card was not valid utf-8")
    }

    fn write_plan<W: Write>(&self, mut out: W, plan: &RenderPlan) -> anyhow::Result<()> {
        if let Some(title) = &plan.title {
            writeln!(out, "{}", self.paint(title, "1"))?;
            writeln!(out, "{}", "=".repeat(UnicodeWidthStr::width(title.as_str())))?;
        }

        for project in &plan.projects {
            if let Some(name) = &project.title {
                match &project.project_url {
                    Some(url) => writeln!(out, "{}  {}", self.paint(name, "1"), self.paint(url, "2"))?,
                    None => writeln!(out, "{}", self.paint(name, "1"))?,
                }
            }

            if project.entries.is_empty() {
                writeln!(out, "  (no tasks)")?;
                continue;
            }

            let rows = project
                .entries
                .iter()
                .map(|entry| {
                    let mark = if entry.closed { CLOSED_MARK } else { OPEN_MARK };
                    let row = vec![
                        mark.to_string(),
                        entry.id.clone(),
                        entry.content.clone(),
                        entry.due_label.clone().unwrap_or_default(),
                    ];
                    if entry.closed {
                        row.into_iter().map(|cell| self.paint(&cell, "9;2")).collect()
                    } else {
                        row
                    }
                })
                .collect();

            write_table(
                &mut out,
                vec![
                    String::new(),
                    "ID".to_string(),
                    "Task".to_string(),
                    "Due".to_string(),
                ],
                rows,
            )?;
        }

        if plan.show_input_area {
            writeln!(out, "{INPUT_PLACEHOLDER}")?;
        }

        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

impl RenderSurface for TextSurface {
    fn replace(&mut self, plan: &RenderPlan) -> anyhow::Result<()> {
        let text = self.render(plan)?;
        let mut out = io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    write_row(&mut writer, &headers, &widths)?;

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    write_row(&mut writer, &rule, &widths)?;

    for row in rows {
        write_row(&mut writer, &row, &widths)?;
    }

    Ok(())
}

fn write_row<W: Write>(writer: &mut W, cells: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let mut line = String::from(" ");
    for (cell, width) in cells.iter().zip(widths) {
        let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
        let padding = width.saturating_sub(visible_width);
        line.push(' ');
        line.push_str(cell);
        line.push_str(&" ".repeat(padding));
    }
    writeln!(writer, "{}", line.trim_end())?;
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
