use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    Label,
    Value,
    Error,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::Label => style(text).bold(),
        StyleType::Value => style(text).green().bold(),
        StyleType::Error => style(text).red(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Creates a new `comfy_table::Table` with standard styling.
pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Creates a styled header cell for a table.
pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Formats an `Option<T>` into a `Cell`. `None` is displayed as "N/A".
pub fn format_optional_cell<T>(value: Option<T>, format_fn: impl Fn(T) -> String) -> Cell {
    value.map_or(
        Cell::new("N/A")
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Right),
        |v| Cell::new(format_fn(v)).set_alignment(CellAlignment::Right),
    )
}

pub fn format_price(value: f64) -> String {
    format!("${value:.2}")
}

/// Signed percentage from a fraction, e.g. `0.1234` -> `+12.34%`.
pub fn format_pct(value: f64) -> String {
    format!("{:+.2}%", value * 100.0)
}

/// Dollar amount scaled to thousands, millions or billions.
pub fn format_usd_compact(value: f64) -> String {
    let abs = value.abs();
    let sign = if value < 0.0 { "-" } else { "" };
    if abs >= 1e9 {
        format!("{sign}${:.2}B", abs / 1e9)
    } else if abs >= 1e6 {
        format!("{sign}${:.2}M", abs / 1e6)
    } else if abs >= 1e3 {
        format!("{sign}${:.2}K", abs / 1e3)
    } else {
        format!("{sign}${abs:.2}")
    }
}

/// Creates a cell for a fractional change, green when non-negative.
pub fn change_cell(change: Option<f64>, bold: bool) -> Cell {
    let Some(change) = change else {
        return format_optional_cell(None::<f64>, format_pct);
    };
    let color = if change >= 0.0 { Color::Green } else { Color::Red };
    let cell = Cell::new(format_pct(change))
        .fg(color)
        .set_alignment(CellAlignment::Right);
    if bold {
        cell.add_attribute(Attribute::Bold)
    } else {
        cell
    }
}

/// Correlation cell shaded by strength.
pub fn correlation_cell(value: Option<f64>) -> Cell {
    let Some(value) = value else {
        return format_optional_cell(None::<f64>, |v| format!("{v:.3}"));
    };
    let cell = Cell::new(format!("{value:.3}")).set_alignment(CellAlignment::Right);
    match value {
        v if v >= 0.7 => cell.fg(Color::Green).add_attribute(Attribute::Bold),
        v if v >= 0.3 => cell.fg(Color::Green),
        v if v >= -0.3 => cell,
        v if v >= -0.7 => cell.fg(Color::Red),
        _ => cell.fg(Color::Red).add_attribute(Attribute::Bold),
    }
}

/// Creates a new `indicatif::ProgressBar` with standard styling.
pub fn new_progress_bar(len: u64, with_message: bool) -> ProgressBar {
    let template = if with_message {
        "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})"
    } else {
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})"
    };

    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Prints a separator line matching the terminal width.
pub fn print_separator() {
    let term_width = console::Term::stdout()
        .size_checked()
        .map(|(_, w)| w as usize)
        .unwrap_or(80);
    println!("\n{}", "─".repeat(term_width));
}
