//! Plain-text session report written when a run ends.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::session::Session;

const RULE: &str = "------------------------------------------";
const BANNER: &str = "==========================================";

fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Render the report for `session` ending at `ended`.
pub fn render(session: &Session, source: &str, ended: DateTime<Local>) -> String {
    let started = session.started_at();
    let total = (ended - started).to_std().unwrap_or_default();
    let records = session.records();

    let mut out = String::new();
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out, "   cadence session report");
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out, "Task source : {source}");
    let _ = writeln!(out, "Started     : {}", started.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Ended       : {}", ended.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "Duration    : {}", fmt_duration(total));
    let _ = writeln!(out, "Tasks       : {}", records.len());
    let _ = writeln!(out, "Fatigue     : {:.3}", session.fatigue_level());
    let _ = writeln!(out, "{BANNER}");
    let _ = writeln!(out);
    let _ = writeln!(out, "[details]");

    let mut busy = Duration::ZERO;
    for r in records {
        let took = r.duration();
        busy += took;
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "Task #{}  ({})", r.index, r.outcome);
        let _ = writeln!(out, "- started : {}", r.started_at.format("%H:%M:%S"));
        let _ = writeln!(out, "- ended   : {}", r.finished_at.format("%H:%M:%S"));
        let _ = writeln!(out, "- took    : {:.1}s", took.as_secs_f64());
        let _ = writeln!(out, "- payload : {}", r.excerpt);
    }
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out);
    let _ = writeln!(out, "[summary]");
    let average = if records.is_empty() {
        0.0
    } else {
        busy.as_secs_f64() / records.len() as f64
    };
    let _ = writeln!(out, "Average per task: {average:.1}s");
    out
}

/// File name for a report on `source` ending at `ended`.
pub fn report_file_name(source: &str, ended: DateTime<Local>) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("tasks");
    format!("Report_{stem}_{}.txt", ended.format("%Y%m%d_%H%M%S"))
}

/// Write the report into `dir` and return its path.
pub async fn write_report(dir: &Path, session: &Session, source: &str) -> Result<PathBuf> {
    let ended = Local::now();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating report dir {}", dir.display()))?;
    let path = dir.join(report_file_name(source, ended));
    tokio::fs::write(&path, render(session, source, ended))
        .await
        .with_context(|| format!("writing report {}", path.display()))?;
    tracing::info!(path = %path.display(), tasks = session.records().len(), "report.written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TaskRecord;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn record(index: usize, secs: i64) -> TaskRecord {
        let start = Local.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        TaskRecord {
            index,
            excerpt: format!("prompt {index}"),
            outcome: "completed".into(),
            started_at: start,
            finished_at: start + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn report_lists_tasks_and_average() {
        let mut s = Session::start(Instant::now());
        s.record(record(1, 20));
        s.record(record(2, 40));
        let text = render(&s, "prompts/scenes.txt", Local::now());
        assert!(text.contains("Task #1  (completed)"));
        assert!(text.contains("- payload : prompt 2"));
        assert!(text.contains("Average per task: 30.0s"));
        assert!(text.contains("Tasks       : 2"));
    }

    #[test]
    fn file_name_uses_the_source_stem() {
        let at = Local.with_ymd_and_hms(2026, 3, 1, 21, 5, 9).unwrap();
        assert_eq!(
            report_file_name("prompts/scenes.txt", at),
            "Report_scenes_20260301_210509.txt"
        );
        assert_eq!(report_file_name("", at), "Report_tasks_20260301_210509.txt");
    }

    #[tokio::test]
    async fn report_is_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = Session::start(Instant::now());
        let path = write_report(dir.path(), &s, "p.txt").await.unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Average per task: 0.0s"));
    }

    #[test]
    fn durations_are_clock_formatted() {
        assert_eq!(fmt_duration(Duration::from_secs(3725)), "1:02:05");
    }
}
