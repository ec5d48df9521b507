//! Terminal board.
//!
//! [`Board::render`] turns a snapshot into labelled rows using the field
//! formatter, plus the hourly table and the QC defect breakdown of the
//! latest hour that has one; [`render_text`] adds the loading, failure and no-data
//! placeholders. [`BoardPrinter`] draws either onto the terminal, with an
//! `indicatif` spinner until the first data arrives.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use console::{Emoji, Term, style};
use indicatif::{ProgressBar, ProgressStyle};

use linewatch_common::{
    DefectEntry, FieldKind, FieldValue, HourlyField, MetricField, Snapshot, TimeSlot,
};

use crate::detect::{ChangeSet, FieldKey};
use crate::format::{
    Bucket, classify, classify_error_rate, classify_qc_defect, classify_rft, classify_target_met,
    format_count, format_percentage, format_signed_delta,
};
use crate::session::ViewState;

static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");
static EMPTY: Emoji<'_, '_> = Emoji("📭 ", "[-] ");
static CHANGED: Emoji<'_, '_> = Emoji("● ", "* ");
static MET: Emoji<'_, '_> = Emoji("✅", "ok");
static MISSED: Emoji<'_, '_> = Emoji("❌", "x");

/// QC defect categories by number: label and whether the tighter limit applies.
const DEFECT_CATEGORIES: [(u8, &str, bool); 14] = [
    (1, "KEO", true),
    (2, "LỖ KIM", false),
    (3, "CHỈ", true),
    (4, "DA", true),
    (5, "VÂN KĐB", true),
    (6, "HW", true),
    (7, "DK G.SÓNG", true),
    (8, "SƠN", true),
    (9, "CT NHĂN", true),
    (10, "LOGO", true),
    (11, "ÉP MỜ", true),
    (12, "CHI TIẾT KTH", true),
    (13, "DÁNG", true),
    (14, "KHÁC", false),
];

/// Fields shown in the title rather than as rows.
const TITLE_FIELDS: [MetricField; 4] = [
    MetricField::LineCode,
    MetricField::Factory,
    MetricField::Line,
    MetricField::Team,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub text: String,
    pub bucket: Bucket,
    pub highlighted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: &'static str,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlyRow {
    pub slot: TimeSlot,
    pub quantity: Cell,
    pub percentage: Cell,
    /// Pass/fail against the hourly target.
    pub target_met: Bucket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefectRow {
    pub category: u8,
    pub label: String,
    pub count: String,
    pub percentage: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub title: String,
    pub rows: Vec<Row>,
    pub hourly: Vec<HourlyRow>,
    /// Slot the defect rows come from.
    pub defect_slot: Option<TimeSlot>,
    pub defects: Vec<DefectRow>,
}

fn defect_rows(defects: &BTreeMap<u8, DefectEntry>, separator: &str) -> Vec<DefectRow> {
    defects
        .iter()
        .map(|(n, entry)| {
            let (label, critical) = DEFECT_CATEGORIES
                .iter()
                .find(|(c, _, _)| c == n)
                .map_or_else(|| (format!("Defect {n}"), false), |(_, l, c)| (l.to_string(), *c));
            DefectRow {
                category: *n,
                label,
                count: format_count(Some(entry.count), separator),
                percentage: Cell {
                    text: format!("{}%", format_percentage(entry.percentage, 2)),
                    bucket: classify_qc_defect(entry.percentage, critical),
                    highlighted: false,
                },
            }
        })
        .collect()
}

fn bucket_for(field: MetricField, value: f64) -> Bucket {
    match field {
        MetricField::Rft => classify_rft(value),
        MetricField::DefectRate => classify_error_rate(value),
        _ if field.kind() == FieldKind::Percentage => classify(value),
        _ => Bucket::Neutral,
    }
}

fn metric_text(field: MetricField, value: FieldValue<'_>, separator: &str) -> String {
    match value {
        FieldValue::Text(t) if t.is_empty() => "-".to_string(),
        FieldValue::Text(t) => t.to_string(),
        FieldValue::Number(n) => match field.kind() {
            FieldKind::Count => format_count(Some(n), separator),
            FieldKind::Percentage => format!("{}%", format_percentage(n, 2)),
            FieldKind::Delta => format_signed_delta(n),
            FieldKind::Ratio | FieldKind::Decimal | FieldKind::Text => format_percentage(n, 2),
        },
    }
}

impl Board {
    pub fn render(snapshot: &Snapshot, highlights: &ChangeSet, separator: &str) -> Self {
        let title = TITLE_FIELDS
            .iter()
            .filter_map(|f| match snapshot.field(*f) {
                FieldValue::Text(t) if !t.is_empty() => Some(t.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" / ");

        let rows = MetricField::ALL
            .iter()
            .filter(|f| !TITLE_FIELDS.contains(*f))
            .map(|field| {
                let value = snapshot.field(*field);
                let bucket = value
                    .as_number()
                    .map_or(Bucket::Neutral, |n| bucket_for(*field, n));
                Row {
                    label: field.label(),
                    cell: Cell {
                        text: metric_text(*field, value, separator),
                        bucket,
                        highlighted: highlights.contains(&FieldKey::Metric(*field)),
                    },
                }
            })
            .collect();

        let hourly = snapshot
            .hourly
            .hourly
            .iter()
            .map(|(slot, data)| {
                let lit = |field| highlights.contains(&FieldKey::Hourly { slot: *slot, field });
                let pct = data.get(HourlyField::Percentage);
                HourlyRow {
                    slot: *slot,
                    quantity: Cell {
                        text: format_count(Some(data.get(HourlyField::Quantity)), separator),
                        bucket: Bucket::Neutral,
                        highlighted: lit(HourlyField::Quantity),
                    },
                    percentage: Cell {
                        text: format!("{}%", format_percentage(pct, 2)),
                        bucket: classify(pct),
                        highlighted: lit(HourlyField::Percentage),
                    },
                    target_met: classify_target_met(pct),
                }
            })
            .collect();

        let latest_defects = snapshot.hourly.latest_with_defects();

        Self {
            title: if title.is_empty() { "-".to_string() } else { title },
            rows,
            hourly,
            defect_slot: latest_defects.map(|(slot, _)| slot),
            defects: latest_defects
                .map(|(_, data)| defect_rows(&data.defects, separator))
                .unwrap_or_default(),
        }
    }

    /// Plain or coloured text. Highlighted cells are marked either way.
    pub fn to_text(&self, color: bool) -> String {
        let width = self.rows.iter().map(|r| r.label.len()).max().unwrap_or(0);
        let mut out = String::new();
        let _ = writeln!(out, "{}", style(&self.title).bold().force_styling(color));
        for row in &self.rows {
            let _ = writeln!(out, "  {:width$}  {}", row.label, paint(&row.cell, color));
        }
        if !self.hourly.is_empty() {
            let _ = writeln!(out, "{}", style("Hourly").bold().force_styling(color));
            for row in &self.hourly {
                let mark = match row.target_met {
                    Bucket::Good => MET.to_string(),
                    Bucket::Neutral => String::new(),
                    _ => MISSED.to_string(),
                };
                let _ = writeln!(
                    out,
                    "  {}  {:>10}  {} {mark}",
                    row.slot.label(),
                    paint(&row.quantity, color),
                    paint(&row.percentage, color)
                );
            }
        }
        if let Some(slot) = self.defect_slot {
            let heading = format!("Defects ({})", slot.label());
            let _ = writeln!(out, "{}", style(heading).bold().force_styling(color));
            let width = self.defects.iter().map(|d| d.label.chars().count()).max().unwrap_or(0);
            for row in &self.defects {
                let pad = width - row.label.chars().count();
                let _ = writeln!(
                    out,
                    "  {}{}  {:>6}  {}",
                    row.label,
                    " ".repeat(pad),
                    row.count,
                    paint(&row.percentage, color)
                );
            }
        }
        out
    }
}

fn paint(cell: &Cell, color: bool) -> String {
    let marker = if cell.highlighted { CHANGED.to_string() } else { String::new() };
    let mut styled = style(cell.text.as_str()).force_styling(color);
    if cell.bucket.is_severity() {
        let palette = cell.bucket.palette();
        styled = styled.fg(palette.fg).bg(palette.bg);
    }
    if cell.highlighted {
        styled = styled.bold().reverse();
    }
    format!("{marker}{styled}")
}

/// Whole-screen text for a view state.
pub fn render_text(state: &ViewState, highlights: &ChangeSet, separator: &str, color: bool) -> String {
    match state {
        ViewState::Loading => "Loading...\n".to_string(),
        ViewState::NoData => format!("{EMPTY}No data for this display\n"),
        ViewState::Ready(published) => {
            Board::render(&published.snapshot, highlights, separator).to_text(color)
        }
        ViewState::Failed {
            message,
            last_known,
        } => {
            let mut out = last_known
                .as_ref()
                .map(|p| Board::render(&p.snapshot, highlights, separator).to_text(color))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "{WARN}{} {}",
                style(format!("Refresh failed: {message}")).red().force_styling(color),
                style("(retrying, press Ctrl-C to quit)").dim().force_styling(color)
            );
            out
        }
    }
}

/// Redraws the board on stdout.
pub struct BoardPrinter {
    term: Term,
    spinner: Option<ProgressBar>,
    separator: String,
}

impl BoardPrinter {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            term: Term::stdout(),
            spinner: None,
            separator: separator.into(),
        }
    }

    pub fn draw(&mut self, state: &ViewState, highlights: &ChangeSet) {
        if matches!(state, ViewState::Loading) {
            if self.spinner.is_none() {
                let spinner = ProgressBar::new_spinner();
                spinner.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                spinner.set_message("Loading production data...");
                spinner.enable_steady_tick(Duration::from_millis(120));
                self.spinner = Some(spinner);
            }
            return;
        }
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        let color = self.term.features().colors_supported();
        let text = render_text(state, highlights, &self.separator, color);
        if self.term.is_term() {
            let _ = self.term.clear_screen();
        }
        let _ = self.term.write_str(&text);
    }
}

impl Drop for BoardPrinter {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}
