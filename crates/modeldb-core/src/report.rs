//! HTML rendering of run records and report comparisons.
//!
//! Output is self-contained static HTML: one page per run record, and for a
//! pair of records a diff page plus a runtimes page.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::diff::DiffResult;
use crate::record::{ModelStatus, RunRecord};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse}td,th{border:1px solid #ccc;padding:2px 6px;text-align:left}\
pre{background:#f6f8fa;padding:.5em;overflow-x:auto}\
.add{color:#22863a}.del{color:#b31d28}.hunk{color:#6f42c1}.hdr{font-weight:bold}\
.fail{background:#fdd}.skip{background:#eee}.slow{color:#b31d28}.fast{color:#22863a}";

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a unified diff with one styled span per line.
pub fn render_unified_diff(diff: &str) -> String {
    let mut out = String::from("<pre class=\"diff\">");
    for line in diff.lines() {
        let class = if line.starts_with("+++") || line.starts_with("---") {
            "hdr"
        } else if line.starts_with("@@") {
            "hunk"
        } else if line.starts_with('+') {
            "add"
        } else if line.starts_with('-') {
            "del"
        } else {
            "ctx"
        };
        let _ = writeln!(out, "<span class=\"{class}\">{}</span>", escape_html(line));
    }
    out.push_str("</pre>");
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{t}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<h1>{t}</h1>\n{body}</body>\n</html>\n",
        t = escape_html(title)
    )
}

fn status_label(status: ModelStatus) -> (&'static str, &'static str) {
    match status {
        ModelStatus::Skipped => ("skipped", "skip"),
        ModelStatus::BuildFailed => ("build failed", "fail"),
        ModelStatus::RunFailed => ("run failed", "fail"),
        ModelStatus::NoEntryPoint => ("no mosinit.hoc", "skip"),
        ModelStatus::Passed => ("ok", "ok"),
    }
}

/// One run record as an HTML page.
pub fn render_report_html(record: &RunRecord, title: &str) -> String {
    let stats = record.stats();
    let mut body = String::new();
    let _ = writeln!(
        body,
        "<h2>NEURON version {}</h2>\n<table>\n<tr><th>Total nof models run</th><td>{}</td></tr>\n<tr><th>Failed models</th><td>{}</td></tr>\n<tr><th>Failed runs</th><td>{}</td></tr>\n<tr><th>Skipped runs</th><td>{}</td></tr>\n</table>",
        escape_html(record.runtime_version()),
        stats.total_models,
        stats.failed_models.count,
        stats.failed_runs.count,
        stats.skipped_runs.count,
    );

    body.push_str("<h2>Models</h2>\n<table>\n<tr><th>Accession number</th><th>Status</th><th>Run time [s]</th></tr>\n");
    for (id, outcome) in &record.models {
        let (label, class) = status_label(outcome.status());
        let _ = writeln!(
            body,
            "<tr class=\"{class}\"><td><a href=\"#m{id}\">{id}</a></td><td>{label}</td><td>{:.2}</td></tr>",
            outcome.run_time
        );
    }
    body.push_str("</table>\n");

    for (id, outcome) in &record.models {
        let _ = writeln!(body, "<h3 id=\"m{id}\">{id}</h3>");
        if let Some(moderr) = &outcome.moderr {
            let _ = writeln!(body, "<h4>Build errors</h4>\n<pre>{}</pre>", escape_html(&moderr.join("\n")));
        }
        let _ = writeln!(body, "<h4>logs</h4>\n<pre>{}</pre>", escape_html(&outcome.logs.join("\n")));
        let _ = writeln!(body, "<h4>nrn_run</h4>\n<pre>{}</pre>", escape_html(&outcome.nrn_run.join("\n")));
    }

    page(title, &body)
}

/// The output diff page of a report comparison.
pub fn render_diff_html(diff: &DiffResult, title: &str) -> String {
    let mut body = String::new();
    body.push_str("<h2>Summary</h2>\n");
    if diff.summary_diff.is_empty() {
        body.push_str("<p>Summaries are identical.</p>\n");
    } else {
        body.push_str(&render_unified_diff(&diff.summary_diff));
        body.push('\n');
    }

    let _ = writeln!(body, "<h2>nrn_run differences ({})</h2>", diff.text_diffs.len());
    for (id, text) in &diff.text_diffs {
        let _ = writeln!(body, "<h3>{id}</h3>\n{}", render_unified_diff(text));
    }

    let _ = writeln!(body, "<h2>gout differences ({})</h2>", diff.gout_diffs.len());
    for (id, text) in &diff.gout_diffs {
        let _ = writeln!(body, "<h3>{id}</h3>\n{}", render_unified_diff(text));
    }

    page(title, &body)
}

/// The runtime comparison page of a report comparison.
pub fn render_runtimes_html(diff: &DiffResult, title: &str) -> String {
    let v1 = escape_html(&diff.version_a);
    let v2 = escape_html(&diff.version_b);
    let mut body = String::new();

    let _ = writeln!(
        body,
        "<h2>Stats</h2>\n<table>\n<tr><th></th><th>{v1}</th><th>{v2}</th></tr>"
    );
    let rows = [
        ("Total nof models run", diff.stats_a.total_models, diff.stats_b.total_models),
        ("Failed models", diff.stats_a.failed_models.count, diff.stats_b.failed_models.count),
        ("Failed runs", diff.stats_a.failed_runs.count, diff.stats_b.failed_runs.count),
        ("Skipped runs", diff.stats_a.skipped_runs.count, diff.stats_b.skipped_runs.count),
    ];
    for (name, a, b) in rows {
        let _ = writeln!(body, "<tr><th>{name}</th><td>{a}</td><td>{b}</td></tr>");
    }
    body.push_str("</table>\n");

    let _ = writeln!(
        body,
        "<h2>Runtimes</h2>\n<table>\n<tr><th>Accession number</th><th>Phase</th><th>{v1} [s]</th><th>{v2} [s]</th><th>Speedup [%]</th></tr>"
    );
    for (id, runtime) in &diff.runtimes {
        let phases = std::iter::once(("total", &runtime.total))
            .chain(runtime.phases.iter().map(|(name, s)| (name.as_str(), s)));
        for (phase, s) in phases {
            let class = if s.speedup < 0.0 { "slow" } else { "fast" };
            let _ = writeln!(
                body,
                "<tr><td>{id}</td><td>{phase}</td><td>{:.2}</td><td>{:.2}</td><td class=\"{class}\">{:.1}</td></tr>",
                s.v1, s.v2, s.speedup
            );
        }
    }
    body.push_str("</table>\n");

    page(title, &body)
}

/// `<stem>.html` in the current directory for a single report.
pub fn report_file_name(json_report: &Path) -> PathBuf {
    PathBuf::from(format!("{}.html", file_stem(json_report)))
}

/// Title plus diff and runtimes page paths for a pair of reports; both pages
/// are written next to the first report.
pub fn diff_file_names(report_a: &Path, report_b: &Path) -> (String, PathBuf, PathBuf) {
    let title = format!("{}-vs-{}", file_stem(report_a), file_stem(report_b));
    let dir = report_a
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| report_a.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let diff_page = dir.join(format!("{title}.html"));
    let runtimes_page = dir.join(format!("runtimes-{title}.html"));
    (title, diff_page, runtimes_page)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Write an HTML page.
pub fn write_html(path: &Path, html: &str) -> Result<()> {
    std::fs::write(path, html).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
