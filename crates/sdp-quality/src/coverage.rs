//! Aggregate coverage extraction from tool output.

/// Pull a single aggregate coverage percentage out of tool output.
///
/// Handles the formats the per-language default commands produce:
///
/// - Go: `coverage: 85.0% of statements`
/// - pytest-cov: `TOTAL    120    18    85%`
/// - jacoco/npm/llvm-cov tables: last `NN.N%` on a `TOTAL`-ish line
///
/// Falls back to the last percentage found anywhere in the output. Returns
/// `None` when no percentage occurs.
pub fn parse_coverage_pct(output: &str) -> Option<f64> {
    // Prefer an explicit total line.
    for line in output.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("coverage:") || lower.starts_with("total") {
            if let Some(pct) = last_percent(line) {
                return Some(pct);
            }
        }
    }
    // Otherwise, the last percentage anywhere.
    output.lines().rev().find_map(last_percent)
}

/// Last `<number>%` on a line.
fn last_percent(line: &str) -> Option<f64> {
    let mut result = None;
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'%' {
            continue;
        }
        let start = line[..i]
            .rfind(|c: char| !c.is_ascii_digit() && c != '.')
            .map(|p| p + 1)
            .unwrap_or(0);
        if start < i {
            if let Ok(v) = line[start..i].parse::<f64>() {
                if (0.0..=100.0).contains(&v) {
                    result = Some(v);
                }
            }
        }
    }
    result
}
