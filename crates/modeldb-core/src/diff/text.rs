//! Line-level unified diffs of captured output.

use similar::TextDiff;

/// Unified diff of two line sequences (three lines of context).
///
/// Returns an empty string when the sequences are equal.
pub fn unified_diff<S: AsRef<str>>(a: &[S], b: &[S], from: &str, to: &str) -> String {
    let old = join_lines(a);
    let new = join_lines(b);
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(&old, &new)
        .unified_diff()
        .context_radius(3)
        .header(from, to)
        .to_string()
}

/// Keep at most `max_lines` lines, appending a suppressed-count marker.
pub fn cap_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return lines.join("\n");
    }
    let mut kept = lines[..max_lines].join("\n");
    kept.push_str(&format!(
        "\n... {} lines suppressed ...",
        lines.len() - max_lines
    ));
    kept
}

fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_sequences_produce_no_diff() {
        let a = ["x", "y"];
        assert!(unified_diff(&a, &a, "a", "b").is_empty());
    }

    #[test]
    fn test_unified_diff_has_headers_and_markers() {
        let out = unified_diff(&["one", "two"], &["one", "three"], "run-a", "run-b");
        assert!(out.starts_with("--- run-a\n+++ run-b\n"));
        assert!(out.contains("-two"));
        assert!(out.contains("+three"));
    }

    #[test]
    fn test_cap_lines() {
        let text = (0..35).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let capped = cap_lines(&text, 30);
        assert_eq!(capped.lines().count(), 31);
        assert!(capped.ends_with("... 5 lines suppressed ..."));
        assert_eq!(cap_lines("a\nb", 30), "a\nb");
    }
}
