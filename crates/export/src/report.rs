//! Report rendering: a multi-section document per record, or a summary
//! document for a bulk selection.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use atrio_core::{uid_string, FeedbackRecord};
use atrio_filter::record_average;

use crate::doc::{truncate_preview, ReportDoc};
use crate::ExportError;

const FOOTER: &str = "Hotel Feedback Management System";
const COMMENT_WRAP_CHARS: usize = 95;
const PREVIEW_CHARS: usize = 48;

/// Deterministic download name for a single-record report.
pub fn single_file_name(record: &FeedbackRecord) -> String {
    format!("Feedback_{}.pdf", uid_string(&record.id))
}

pub fn bulk_file_name(now: DateTime<Utc>) -> String {
    format!("Feedback_Bulk_Export_{}.pdf", now.date_naive())
}

/// Outcome of an export: where the document landed and how many records it
/// covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedReport {
    pub path: PathBuf,
    pub records: usize,
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Render the detailed single-record report: header block, ratings table,
/// word-wrapped comments, repeated footer.
pub fn render_single(record: &FeedbackRecord) -> Result<Vec<u8>, ExportError> {
    let mut doc = ReportDoc::new("Guest Feedback Report")?;
    doc.title("Guest Feedback Report");
    doc.gap(6.0);

    doc.line(&format!("Guest: {}", record.name));
    doc.line(&format!("Email: {}", record.email));
    doc.line(&format!("Hotel: {}", record.hotel_name));
    if !record.room_number.is_empty() {
        doc.line(&format!("Room: {}", record.room_number));
    }
    if !record.stay_date.is_empty() {
        doc.line(&format!("Stay Date: {}", record.stay_date));
    }
    doc.line(&format!("Submitted: {}", record.created_at.format("%Y-%m-%d")));
    doc.line(&format!("Status: {}", record.status));

    doc.gap(6.0);
    let rows: Vec<Vec<String>> = record
        .ratings
        .iter()
        .map(|(category, score)| vec![capitalize(category), score.to_string()])
        .collect();
    doc.table(&["Category", "Rating (out of 5)"], &[70.0, 50.0], &rows);

    doc.gap(6.0);
    doc.heading("Guest Comments:");
    doc.gap(1.0);
    doc.paragraph(&record.comments, COMMENT_WRAP_CHARS);

    doc.finish(FOOTER)
}

/// Render the bulk summary report: per-category averages plus one row per
/// record with a truncated comment preview.
pub fn render_bulk(
    records: &[FeedbackRecord],
    now: DateTime<Utc>,
) -> Result<Vec<u8>, ExportError> {
    let mut doc = ReportDoc::new("Bulk Feedback Report")?;
    doc.title("Bulk Feedback Report");
    doc.gap(6.0);
    doc.line(&format!("Total Feedback Items: {}", records.len()));
    doc.line(&format!("Report Generated: {}", now.format("%Y-%m-%d %H:%M UTC")));

    // Per-category averages across the whole selection.
    let mut sums: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for r in records {
        for (category, score) in &r.ratings {
            let slot = sums.entry(category.as_str()).or_insert((0, 0));
            slot.0 += *score as u32;
            slot.1 += 1;
        }
    }
    let avg_rows: Vec<Vec<String>> = sums
        .iter()
        .map(|(category, (total, count))| {
            vec![capitalize(category), format!("{:.1}", *total as f64 / *count as f64)]
        })
        .collect();
    doc.gap(6.0);
    doc.table(&["Category", "Average Rating (out of 5)"], &[70.0, 60.0], &avg_rows);

    doc.gap(8.0);
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                truncate_preview(&r.name, 18),
                r.created_at.format("%Y-%m-%d").to_string(),
                format!("{:.1}", record_average(r)),
                r.status.to_string(),
                truncate_preview(&r.comments, PREVIEW_CHARS),
            ]
        })
        .collect();
    doc.table(
        &["Guest", "Date", "Avg. Rating", "Status", "Comments Preview"],
        &[34.0, 24.0, 24.0, 26.0, 74.0],
        &rows,
    );

    doc.finish(FOOTER)
}

fn write_document(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(name);
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Export one record as a detailed report into `dir`.
pub fn export_one(record: &FeedbackRecord, dir: &Path) -> Result<ExportedReport, ExportError> {
    let t0 = Instant::now();
    let bytes = render_single(record)?;
    let path = write_document(dir, &single_file_name(record), &bytes)?;
    metrics::counter!("export_pdf_total", 1u64, "kind" => "single");
    metrics::histogram!("export_render_ms", t0.elapsed().as_secs_f64() * 1000.0);
    info!(path = %path.display(), "feedback report exported");
    Ok(ExportedReport { path, records: 1 })
}

/// Export a selection: exactly one record gets the detailed report, several
/// get the summary document. An empty selection is refused before any
/// filesystem side effect.
pub fn export_many(
    records: &[FeedbackRecord],
    dir: &Path,
    now: DateTime<Utc>,
) -> Result<ExportedReport, ExportError> {
    match records {
        [] => Err(ExportError::NothingSelected),
        [one] => export_one(one, dir),
        many => {
            let t0 = Instant::now();
            let bytes = render_bulk(many, now)?;
            let path = write_document(dir, &bulk_file_name(now), &bytes)?;
            metrics::counter!("export_pdf_total", 1u64, "kind" => "bulk");
            metrics::histogram!("export_render_ms", t0.elapsed().as_secs_f64() * 1000.0);
            info!(path = %path.display(), records = many.len(), "bulk report exported");
            Ok(ExportedReport { path, records: many.len() })
        }
    }
}
