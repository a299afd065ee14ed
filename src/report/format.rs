use crate::bundle::Bundle;
use crate::cv::CvReport;
use crate::store::ArtifactVersion;

/// Format a cross-validation run: per-fold scores, failures and the
/// coefficient aggregate.
pub fn format_cv_summary(report: &CvReport, source: &str) -> String {
    let summary = report.summary();
    let mut out = String::new();

    out.push_str("=== cfreq - Claim Frequency Cross-Validation ===\n");
    out.push_str(&format!("Data: {source} (n={})\n", report.n_obs));
    out.push_str(&format!(
        "Folds: k={} seed={} | ok={} failed={}\n",
        report.k, report.seed, summary.folds_ok, summary.folds_failed
    ));

    out.push_str("\nPer-fold deviance:\n");
    push_row(&mut out, format!("{:>4} {:>10} {:>10} {:>12}", "fold", "analysis", "assess", "deviance"));
    push_row(&mut out, format!("{:->4} {:->10} {:->10} {:->12}", "", "", "", ""));
    for r in &report.results {
        push_row(
            &mut out,
            format!(
                "{:>4} {:>10} {:>10} {:>12.6}",
                r.fold, r.analysis_size, r.assessment_size, r.deviance
            ),
        );
    }
    for f in &report.failures {
        push_row(&mut out, format!("{:>4} FAILED {}", f.fold, f.error.message()));
    }

    out.push_str("\nCoefficients across folds:\n");
    push_row(&mut out, format!("{:<28} {:>12} {:>10} {:>5}", "term", "mean", "std", "folds"));
    push_row(&mut out, format!("{:-<28} {:->12} {:->10} {:->5}", "", "", "", ""));
    for c in &summary.coefficients {
        push_row(
            &mut out,
            format!(
                "{:<28} {:>12.6} {:>10.6} {:>5}",
                truncate(&c.name, 28),
                c.mean,
                c.std,
                c.folds
            ),
        );
    }

    out.push_str(&format!("\nMean out-of-fold Poisson deviance: {:.6}\n", summary.mean_deviance));
    out
}

/// Format a fitted bundle's coefficients, optionally with its store version.
pub fn format_model(bundle: &Bundle, meta: Option<&ArtifactVersion>) -> String {
    let model = bundle.model();
    let mut out = String::new();

    match meta {
        Some(m) => out.push_str(&format!("Model {} v{} ({})\n", m.name, m.version, short_hash(&m.hash))),
        None => out.push_str("Model (unpublished)\n"),
    }
    out.push_str(&format!(
        "Trained: {} | n={} | deviance={:.3} | IRLS iterations={}\n",
        bundle.trained_at().format("%Y-%m-%d %H:%M:%SZ"),
        model.n_obs(),
        model.deviance(),
        model.iterations()
    ));
    for (name, value) in model.coefficients() {
        push_row(&mut out, format!("  {:<28} {:>12.6}", truncate(&name, 28), value));
    }
    out
}

/// Format the version listing for one artifact name.
pub fn format_versions(name: &str, versions: &[ArtifactVersion]) -> String {
    if versions.is_empty() {
        return format!("No versions of '{name}'.\n");
    }
    let mut out = String::new();
    push_row(&mut out, format!("{:>8} {:<20} {:>10} {:<16}", "version", "created", "bytes", "hash"));
    push_row(&mut out, format!("{:->8} {:-<20} {:->10} {:-<16}", "", "", "", ""));
    for v in versions {
        push_row(
            &mut out,
            format!(
                "{:>8} {:<20} {:>10} {:<16}",
                v.version,
                v.created_at.format("%Y-%m-%d %H:%M:%S"),
                v.size,
                short_hash(&v.hash)
            ),
        );
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('.');
    out
}
