//! Report rendering and CSV export.
//!
//! - JSON for programmatic consumption
//! - Plain-text summary with ASCII rank histograms for terminals
//! - Markdown for sharing
//! - CSV tables for external plotting

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sbc_common::{OutputFormat, Result};

use super::{ParameterCalibration, RunReport};
use crate::record::ReplicateRecord;

const BAR_WIDTH: usize = 40;

/// Render a report in the requested format.
pub fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        OutputFormat::Summary => Ok(summary(report)),
        OutputFormat::Md => Ok(markdown(report)),
    }
}

fn verdict(p: &ParameterCalibration) -> &'static str {
    if p.is_suspect() {
        "SUSPECT"
    } else {
        "ok"
    }
}

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{:.*}", precision, x),
        _ => "-".to_string(),
    }
}

/// ASCII histogram: one row per bin, `|` marks the band edges.
fn ascii_histogram(p: &ParameterCalibration) -> String {
    let h = &p.histogram;
    let scale_max = h
        .bins
        .iter()
        .map(|b| b.count.max(b.band.upper))
        .max()
        .unwrap_or(1)
        .max(1) as f64;
    let col = |v: u64| ((v as f64 / scale_max) * BAR_WIDTH as f64).round() as usize;

    let mut out = String::new();
    for bin in &h.bins {
        let filled = col(bin.count);
        let lo = col(bin.band.lower);
        let hi = col(bin.band.upper).min(BAR_WIDTH);
        let mut row: Vec<char> = (0..=BAR_WIDTH)
            .map(|i| if i < filled { '#' } else { ' ' })
            .collect();
        for edge in [lo, hi] {
            if edge <= BAR_WIDTH {
                row[edge] = '|';
            }
        }
        let bar: String = row.into_iter().collect();
        let _ = writeln!(
            out,
            "  {:>4}-{:<4} {:>5} {} {}",
            bin.lower,
            bin.upper,
            bin.count,
            bar,
            if bin.inside { "" } else { "*" }
        );
    }
    out
}

fn summary(report: &RunReport) -> String {
    let mut out = String::new();
    let c = &report.counts;
    let _ = writeln!(out, "SBC report: {} ({})", report.run_name, report.run_id);
    let _ = writeln!(
        out,
        "backend {}  L = {}  bins = {}  level = {}  alpha = {}",
        report.backend,
        report.max_rank,
        report.analysis.bins,
        report.analysis.level,
        report.analysis.alpha
    );
    let _ = writeln!(
        out,
        "replicates: {} total, {} ok, {} flagged ({:.1}%), {} failed",
        c.total,
        c.ok,
        c.flagged,
        100.0 * c.flagged_fraction,
        c.failed
    );
    for (kind, n) in &c.failures {
        let _ = writeln!(out, "  failed {}: {}", kind, n);
    }
    for warning in &report.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    if !report.fixed_parameters.is_empty() {
        let _ = writeln!(out, "fixed (not ranked): {}", report.fixed_parameters.join(", "));
    }

    for p in &report.parameters {
        out.push('\n');
        let _ = writeln!(
            out,
            "── {} [{}] ──────────────────────────────",
            p.parameter,
            verdict(p)
        );
        let _ = writeln!(
            out,
            "  chi2 = {:.2} (df {}), p = {:.4}; {}/{} bins inside band; pattern {}",
            p.uniformity.statistic,
            p.uniformity.df,
            p.uniformity.p_value,
            p.histogram.bins_inside,
            p.histogram.k(),
            p.pattern
        );
        if p.is_suspect() {
            let _ = writeln!(out, "  {}", p.interpretation);
        }
        let _ = writeln!(
            out,
            "  ECDF: max |diff| {:.3}, {:.1}% of points outside envelope",
            p.ecdf.max_abs_diff,
            100.0 * p.ecdf.outside_fraction
        );
        if let Some(s) = &p.sensitivity {
            let _ = writeln!(
                out,
                "  z-score mean {} sd {}; contraction mean {} (5% {}, 95% {})",
                fmt_opt(Some(s.mean_z), 3),
                fmt_opt(Some(s.sd_z), 3),
                fmt_opt(Some(s.mean_contraction), 3),
                fmt_opt(Some(s.contraction_quantiles[0]), 3),
                fmt_opt(Some(s.contraction_quantiles[2]), 3)
            );
        }
        out.push_str(&ascii_histogram(p));
    }
    if !report.parameters.is_empty() {
        let _ = writeln!(out, "\n  # = count, | = band edges, * = outside band");
    }
    out
}

fn markdown(report: &RunReport) -> String {
    let mut out = String::new();
    let c = &report.counts;
    let _ = writeln!(out, "# SBC report: {}\n", report.run_name);
    let _ = writeln!(out, "- Run: `{}`", report.run_id);
    let _ = writeln!(out, "- Backend: {}", report.backend);
    let _ = writeln!(out, "- Thinned draws (L): {}", report.max_rank);
    let _ = writeln!(
        out,
        "- Replicates: {} total, {} ok, {} flagged ({:.1}%), {} failed",
        c.total,
        c.ok,
        c.flagged,
        100.0 * c.flagged_fraction,
        c.failed
    );
    if !report.fixed_parameters.is_empty() {
        let _ = writeln!(out, "- Fixed (not ranked): {}", report.fixed_parameters.join(", "));
    }
    if !report.warnings.is_empty() {
        out.push_str("\n## Warnings\n\n");
        for w in &report.warnings {
            let _ = writeln!(out, "- {}", w);
        }
    }

    out.push_str("\n## Calibration\n\n");
    out.push_str("| Parameter | Verdict | chi2 | df | p | Bins in band | Pattern | ECDF outside | Mean z | Mean contraction |\n");
    out.push_str("|---|---|---|---|---|---|---|---|---|---|\n");
    for p in &report.parameters {
        let (z, contraction) = p
            .sensitivity
            .as_ref()
            .map_or((None, None), |s| (Some(s.mean_z), Some(s.mean_contraction)));
        let _ = writeln!(
            out,
            "| `{}` | {} | {:.2} | {} | {:.4} | {}/{} | {} | {:.1}% | {} | {} |",
            p.parameter,
            verdict(p),
            p.uniformity.statistic,
            p.uniformity.df,
            p.uniformity.p_value,
            p.histogram.bins_inside,
            p.histogram.k(),
            p.pattern,
            100.0 * p.ecdf.outside_fraction,
            fmt_opt(z, 3),
            fmt_opt(contraction, 3)
        );
    }

    let suspects: Vec<&ParameterCalibration> =
        report.parameters.iter().filter(|p| p.is_suspect()).collect();
    if !suspects.is_empty() {
        out.push_str("\n## Suspect parameters\n\n");
        for p in suspects {
            let _ = writeln!(out, "- `{}`: {} ({})", p.parameter, p.pattern, p.interpretation);
        }
    }
    out
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_num(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

/// Write `ranks.csv`, `sensitivity.csv`, `histogram.csv` and `ecdf.csv`
/// into `dir`; returns the written paths.
pub fn export_csv(report: &RunReport, records: &[ReplicateRecord], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let names: Vec<&str> = report.parameters.iter().map(|p| p.parameter.as_str()).collect();

    let mut ranks = String::from("replicate,status");
    for name in &names {
        ranks.push(',');
        ranks.push_str(&csv_field(name));
    }
    ranks.push('\n');
    for record in records.iter().filter(|r| r.status.has_ranks()) {
        let _ = write!(ranks, "{},{}", record.index, record.status);
        for name in &names {
            ranks.push(',');
            if let Some(r) = record.ranks.get(*name) {
                let _ = write!(ranks, "{}", r);
            }
        }
        ranks.push('\n');
    }

    let mut sensitivity = String::from("parameter,replicate,z_score,contraction\n");
    let mut histogram =
        String::from("parameter,bin,lower,upper,count,expected,band_lower,band_median,band_upper,inside\n");
    let mut ecdf = String::from("parameter,rank,fraction,diff,lower,upper\n");
    for p in &report.parameters {
        let name = csv_field(&p.parameter);
        if let Some(s) = &p.sensitivity {
            for point in &s.points {
                let _ = writeln!(
                    sensitivity,
                    "{},{},{},{}",
                    name,
                    point.replicate,
                    csv_num(point.z_score),
                    csv_num(point.contraction)
                );
            }
        }
        for (b, bin) in p.histogram.bins.iter().enumerate() {
            let _ = writeln!(
                histogram,
                "{},{},{},{},{},{},{},{},{},{}",
                name,
                b,
                bin.lower,
                bin.upper,
                bin.count,
                csv_num(bin.band.expected),
                bin.band.lower,
                bin.band.median,
                bin.band.upper,
                bin.inside
            );
        }
        for point in &p.ecdf.points {
            let _ = writeln!(
                ecdf,
                "{},{},{},{},{},{}",
                name,
                point.rank,
                csv_num(point.fraction),
                csv_num(point.diff),
                csv_num(point.lower),
                csv_num(point.upper)
            );
        }
    }

    let mut written = Vec::new();
    for (file, content) in [
        ("ranks.csv", ranks),
        ("sensitivity.csv", sensitivity),
        ("histogram.csv", histogram),
        ("ecdf.csv", ecdf),
    ] {
        let path = dir.join(file);
        std::fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}
