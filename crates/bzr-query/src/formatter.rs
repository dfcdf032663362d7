//! Report output: Table, Markdown and JSON.

use crate::executor::{ReportBody, ReportOutput};
use crate::render::{RenderedRow, RenderedTable};

/// Output format for a finished report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
    Markdown,
}

/// Format a report in the specified output format.
#[must_use]
pub fn format_results(output: &ReportOutput, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => format_json(output),
        OutputFormat::Table => format_table(output),
        OutputFormat::Markdown => format_markdown(output),
    }
}

fn format_json(output: &ReportOutput) -> String {
    serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
}

fn format_table(output: &ReportOutput) -> String {
    let mut text = match &output.body {
        ReportBody::Count(n) => format!("{n}\n"),
        ReportBody::NoResults(message) => format!("({message})\n"),
        ReportBody::Table(table) => table_text(table),
    };

    if let Some(url) = &output.search_url {
        text.push_str(&format!("\nSearch: {url}\n"));
    }
    for diagnostic in &output.diagnostics {
        text.push_str(&format!("warning: {diagnostic}\n"));
    }
    if output.debug.is_some() {
        text.push_str(&format!("SQL = {}\n", output.sql));
    }
    text
}

fn table_text(table: &RenderedTable) -> String {
    let mut output = String::new();
    if let Some(title) = &table.title {
        output.push_str(title);
        output.push_str("\n\n");
    }

    // Column widths over headings, cells and totals
    let mut widths: Vec<usize> = match &table.headings {
        Some(headings) => headings.iter().map(|h| h.chars().count()).collect(),
        None => vec![0; table.columns.len()],
    };
    let bug_cells = table.rows.iter().filter_map(|r| match r {
        RenderedRow::Bug { cells, .. } => Some(cells),
        RenderedRow::Group { .. } => None,
    });
    for cells in bug_cells.chain(table.totals.as_ref()) {
        for (i, cell) in cells.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };
    let separator = {
        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        format!("{}\n", sep.join("-+-"))
    };

    if let Some(headings) = &table.headings {
        output.push_str(&line(headings));
        output.push_str(&separator);
    }

    if table.rows.is_empty() && table.totals.is_none() {
        output.push_str("(no results)\n");
    }
    for row in &table.rows {
        match row {
            RenderedRow::Group { heading } => output.push_str(&format!("[{heading}]\n")),
            RenderedRow::Bug { cells, comment, .. } => {
                output.push_str(&line(cells));
                if let Some(comment) = comment {
                    output.push_str(&format!("    > {comment}\n"));
                }
            }
        }
    }

    if let Some(totals) = &table.totals {
        output.push_str(&separator);
        output.push_str(&line(totals));
    }
    if table.truncated {
        output.push_str("...\n");
    }

    if let Some(bars) = &table.bars {
        output.push('\n');
        let width = bars.iter().map(|b| b.value.chars().count()).max().unwrap_or(0);
        for bar in bars {
            output.push_str(&format!(
                "{:width$} | {} {}\n",
                bar.value,
                "#".repeat(bar.count),
                bar.count
            ));
        }
    }

    output
}

fn format_markdown(output: &ReportOutput) -> String {
    let mut text = match &output.body {
        ReportBody::Count(n) => format!("**{n}**\n"),
        ReportBody::NoResults(message) => format!("*{message}*\n"),
        ReportBody::Table(table) => table_markdown(table),
    };

    if let Some(url) = &output.search_url {
        text.push_str(&format!("\n[Search]({url})\n"));
    }
    if !output.diagnostics.is_empty() {
        text.push('\n');
        for diagnostic in &output.diagnostics {
            text.push_str(&format!("> {diagnostic}\n"));
        }
    }
    if output.debug.is_some() {
        text.push_str(&format!("\n```sql\n{}\n```\n", output.sql));
    }
    text
}

fn table_markdown(table: &RenderedTable) -> String {
    let mut output = String::new();
    if let Some(title) = &table.title {
        output.push_str(&format!("### {title}\n\n"));
    }

    if table.rows.is_empty() && table.totals.is_none() {
        output.push_str("*No results*\n");
        return output;
    }

    // Markdown tables need a header row; hidden headers become blanks
    let headings: Vec<String> = table
        .headings
        .clone()
        .unwrap_or_else(|| vec![" ".to_string(); table.columns.len()]);
    output.push_str(&format!("| {} |\n", headings.join(" | ")));
    let seps: Vec<&str> = headings.iter().map(|_| "---").collect();
    output.push_str(&format!("| {} |\n", seps.join(" | ")));

    let span = table.columns.len().saturating_sub(1);
    for row in &table.rows {
        match row {
            RenderedRow::Group { heading } => {
                output.push_str(&format!("| **{heading}** |{}\n", " |".repeat(span)));
            }
            RenderedRow::Bug { cells, comment, .. } => {
                let cells: Vec<String> = cells.iter().map(|c| escape_pipes(c)).collect();
                output.push_str(&format!("| {} |\n", cells.join(" | ")));
                if let Some(comment) = comment {
                    output.push_str(&format!(
                        "| *{}* |{}\n",
                        escape_pipes(comment),
                        " |".repeat(span)
                    ));
                }
            }
        }
    }

    if let Some(totals) = &table.totals {
        let totals: Vec<String> = totals.iter().map(|c| format!("**{c}**")).collect();
        output.push_str(&format!("| {} |\n", totals.join(" | ")));
    }

    if let Some(bars) = &table.bars {
        output.push('\n');
        for bar in bars {
            output.push_str(&format!("- {}: {}\n", bar.value, bar.count));
        }
    }

    output
}

/// Wiki links use `|`, which would split a Markdown cell.
fn escape_pipes(value: &str) -> String {
    value.replace('|', "\\|")
}
