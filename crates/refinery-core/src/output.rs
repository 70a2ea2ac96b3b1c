//! Rendering for queue listings.

use chrono::{DateTime, Utc};

use crate::request::{MergeRequest, MergeStatus};

const ID_WIDTH: usize = 16;
const TITLE_WIDTH: usize = 40;

/// Compact age like `45s`, `3m`, `2h`, `5d`. Clock skew into the future
/// clamps to `0s`.
#[must_use]
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - created_at).num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s")
    } else if seconds < 3_600 {
        format!("{}m", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h", seconds / 3_600)
    } else {
        format!("{}d", seconds / 86_400)
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

struct Row {
    cells: [String; 7],
    detail: Option<String>,
}

fn row_for(mr: &MergeRequest, now: DateTime<Utc>) -> Row {
    let detail = match mr.status {
        MergeStatus::Blocked => {
            let first = mr
                .blocked_by
                .first()
                .map_or_else(|| "external dependency".to_string(), ToString::to_string);
            Some(format!("(waiting on {first}, {} blocking)", mr.blocked_by_count))
        }
        MergeStatus::Failed => mr
            .error
            .as_deref()
            .map(|e| format!("(error: {})", truncate(e, 70))),
        _ => None,
    };

    Row {
        cells: [
            truncate(mr.id.as_str(), ID_WIDTH),
            mr.status.to_string(),
            mr.priority.to_string(),
            mr.target.clone(),
            mr.worker.clone(),
            format_age(mr.created_at, now),
            truncate(&mr.title, TITLE_WIDTH),
        ],
        detail,
    }
}

/// Aligned text table of merge requests, one line per entry plus a detail
/// line for blocked and failed ones.
#[must_use]
pub fn render_table(mrs: &[MergeRequest], now: DateTime<Utc>) -> String {
    const HEADERS: [&str; 7] = ["ID", "STATUS", "PRIO", "TARGET", "WORKER", "AGE", "TITLE"];

    let rows: Vec<Row> = mrs.iter().map(|mr| row_for(mr, now)).collect();
    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.cells.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let render_line = |cells: &[String]| -> String {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(cell);
            // Pad every column but the last.
            if i + 1 < cells.len() {
                for _ in cell.chars().count()..widths[i] {
                    line.push(' ');
                }
            }
        }
        line
    };

    let headers: Vec<String> = HEADERS.iter().map(ToString::to_string).collect();
    out.push_str(&render_line(&headers));
    out.push('\n');

    for row in &rows {
        out.push_str(&render_line(&row.cells));
        out.push('\n');
        if let Some(detail) = &row.detail {
            out.push_str("  ");
            out.push_str(detail);
            out.push('\n');
        }
    }
    out
}
