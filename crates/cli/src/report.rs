//! Plain-text renderings for command output. JSON output serializes the same
//! values directly.

use std::fmt::Write;
use storage::models::RoundRow;
use tagger_core::models::{ImageRecord, TagRecord};
use tagger_core::pipeline::{ExportReport, RunSummary};
use tagger_core::scanner::SidecarPartition;
use tagger_core::taxonomy::LoadedTaxonomy;

pub fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

pub fn run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "tag: collected {}, skipped existing {}, processed {}",
        summary.collected, summary.skipped_existing, summary.processed
    );
    if summary.taxonomy_fallback {
        let _ = writeln!(out, "  using built-in taxonomy");
    }
    if summary.scorer_unavailable {
        let _ = writeln!(out, "  classifier unavailable; no rounds run");
    }
    for r in &summary.rounds {
        let _ = writeln!(
            out,
            "  round {} [{}]: {} tagged, {} tags, {} unreadable, {} classifier failures, {} store failures",
            r.round,
            r.source,
            r.images_tagged,
            r.tags_written,
            r.load_failures,
            r.classifier_failures,
            r.store_failures
        );
    }
    match &summary.export {
        Some(e) => out.push_str(&export_report(e)),
        None => {
            let _ = writeln!(out, "  export skipped");
        }
    }
    out
}

pub fn export_report(report: &ExportReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "export: {} image(s)", report.images);
    if let Some(s) = &report.sidecars {
        let _ = writeln!(
            out,
            "  sidecars: {} written, {} failed",
            s.written,
            s.failed.len()
        );
        for path in &s.failed {
            let _ = writeln!(out, "    failed: {}", path.display());
        }
    }
    if let Some(rows) = report.csv_rows {
        let _ = writeln!(out, "  csv: {} row(s)", rows);
    }
    if let Some(err) = &report.csv_error {
        let _ = writeln!(out, "  csv failed: {}", err);
    }
    out
}

pub fn partition(p: &SidecarPartition) -> String {
    format!(
        "status: {} image(s), {} with sidecar, {} without\n",
        p.total(),
        p.with_sidecar.len(),
        p.without_sidecar.len()
    )
}

pub fn image_history(record: &ImageRecord, history: &[TagRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.path);
    let _ = writeln!(
        out,
        "  rounds: {}  model: {}  nsfw: {} ({:.3})",
        record.rounds_processed,
        record.model_used.as_deref().unwrap_or("-"),
        record.nsfw_detected,
        record.max_nsfw_confidence
    );
    let _ = writeln!(
        out,
        "  first seen {}, last seen {}",
        format_timestamp(record.first_seen),
        format_timestamp(record.last_seen)
    );
    for t in history {
        let _ = writeln!(
            out,
            "  #{} {:<10} {}/{}/{} {:.3}",
            t.round, t.source, t.category, t.subcategory, t.tag_name, t.confidence
        );
    }
    out
}

pub fn rounds(rows: &[RoundRow]) -> String {
    if rows.is_empty() {
        return "no rounds recorded\n".to_string();
    }
    let mut out = String::new();
    for r in rows {
        let finished = r
            .completed_at
            .map(format_timestamp)
            .unwrap_or_else(|| "incomplete".to_string());
        let _ = writeln!(
            out,
            "#{} {} model={} images={} tags={} started={} finished={}",
            r.round,
            r.source,
            r.model_used.as_deref().unwrap_or("-"),
            r.image_count,
            r.tag_count,
            format_timestamp(r.started_at),
            finished
        );
    }
    out
}

pub fn taxonomy(loaded: &LoadedTaxonomy) -> String {
    let mut out = String::new();
    let s = &loaded.summary;
    let _ = writeln!(
        out,
        "taxonomy {}: {} categories, {} subcategories, {} queries",
        loaded.taxonomy.source(),
        s.categories,
        s.subcategories,
        s.queries
    );
    for g in loaded.taxonomy.groups() {
        let _ = writeln!(
            out,
            "  {}/{}: {}",
            g.category,
            g.subcategory,
            g.queries.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tagger_core::pipeline::RoundReport;
    use tagger_core::sidecar::SidecarReport;

    #[test]
    fn summary_lists_rounds_and_export() {
        let summary = RunSummary {
            collected: 3,
            processed: 3,
            rounds: vec![RoundReport {
                round: 4,
                source: "poses".into(),
                images_tagged: 2,
                tags_written: 5,
                load_failures: 1,
                ..RoundReport::default()
            }],
            export: Some(ExportReport {
                images: 2,
                sidecars: Some(SidecarReport {
                    written: 1,
                    failed: vec![PathBuf::from("/x/b.jpg")],
                }),
                csv_rows: Some(2),
                csv_error: None,
            }),
            ..RunSummary::default()
        };
        let text = run_summary(&summary);
        assert!(text.contains("round 4 [poses]: 2 tagged, 5 tags, 1 unreadable"));
        assert!(text.contains("sidecars: 1 written, 1 failed"));
        assert!(text.contains("failed: /x/b.jpg"));
        assert!(text.contains("csv: 2 row(s)"));
    }

    #[test]
    fn detect_only_summary_says_export_skipped() {
        let text = run_summary(&RunSummary::default());
        assert!(text.contains("export skipped"));
    }

    #[test]
    fn timestamps_render_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn empty_ledger() {
        assert_eq!(rounds(&[]), "no rounds recorded\n");
    }
}
