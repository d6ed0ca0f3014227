use crate::types::{ColorMode, LogLine, OutputConfig, OutputMode, Timestamp};
use owo_colors::OwoColorize;
use std::hash::{Hash, Hasher};
use std::io::IsTerminal;

const LABEL_COL_WIDTH: usize = 24;

pub fn format_line(line: &LogLine, out: &OutputConfig) -> String {
    match out.mode {
        OutputMode::Human => format_human(line, out, should_color(out)),
        OutputMode::Json => format_json(line),
    }
}

fn format_json(line: &LogLine) -> String {
    let obj = serde_json::json!({
        "ts": line.timestamp,
        "source": line.source_label,
        "message": line.text,
    });

    obj.to_string()
}

fn format_human(line: &LogLine, out: &OutputConfig, color: bool) -> String {
    let label_padded = pad_label(&line.source_label, LABEL_COL_WIDTH);

    let label_final = if color {
        colorize_label(label_padded, &line.source_label)
    } else {
        label_padded
    };

    if out.timestamps && line.timestamp != Timestamp::Missing {
        format!("{} {label_final} │ {}", line.timestamp, line.text)
    } else {
        format!("{label_final} │ {}", line.text)
    }
}

fn pad_label(s: &str, width: usize) -> String {
    if s.len() >= width {
        s.to_string()
    } else {
        format!("{s:<width$}", width = width)
    }
}

fn should_color(out: &OutputConfig) -> bool {
    match out.color {
        ColorMode::Never => false,
        ColorMode::Always => true,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    }
}

fn colorize_label(padded: String, source: &str) -> String {
    match stable_color_index(source) {
        0 => padded.bright_blue().to_string(),
        1 => padded.bright_green().to_string(),
        2 => padded.bright_magenta().to_string(),
        3 => padded.bright_cyan().to_string(),
        4 => padded.bright_yellow().to_string(),
        5 => padded.bright_red().to_string(),
        6 => padded.blue().to_string(),
        7 => padded.green().to_string(),
        8 => padded.magenta().to_string(),
        9 => padded.cyan().to_string(),
        _ => padded.yellow().to_string(),
    }
}

fn stable_color_index(s: &str) -> usize {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    (h.finish() as usize) % 11
}
