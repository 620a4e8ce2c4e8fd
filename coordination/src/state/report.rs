//! Report finality and the placeholder written for failed branches.

use crate::catalog::StepId;

/// Prefix of every placeholder report.
pub const PLACEHOLDER_PREFIX: &str = "[unavailable]";

/// Placeholder content for a branch that ended without a usable report.
pub fn placeholder_report(step: StepId, reason: &str) -> String {
    format!(
        "{} {} analysis produced no report: {}",
        PLACEHOLDER_PREFIX, step, reason
    )
}

/// Placeholder that keeps any partial content the branch had already written.
pub fn placeholder_with_partial(step: StepId, reason: &str, partial: &str) -> String {
    let mut content = placeholder_report(step, reason);
    let partial = partial.trim();
    if !partial.is_empty() && !is_placeholder(partial) {
        content.push_str("\n\n");
        content.push_str(partial);
    }
    content
}

/// Whether a report is a placeholder.
pub fn is_placeholder(content: &str) -> bool {
    content.trim_start().starts_with(PLACEHOLDER_PREFIX)
}

/// A report is final once it is a real (non-placeholder) report of at
/// least `min_len` characters. Final reports are never overwritten.
pub fn is_final_report(content: &str, min_len: usize) -> bool {
    !is_placeholder(content) && meets_min_len(content, min_len)
}

/// Character-count check on trimmed content. An empty report never passes.
pub fn meets_min_len(content: &str, min_len: usize) -> bool {
    let len = content.trim().chars().count();
    len > 0 && len >= min_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        let p = placeholder_report(StepId::Market, "tool-call ceiling reached");
        assert!(is_placeholder(&p));
        assert!(p.contains("market"));
        assert!(!is_final_report(&p, 10));
    }

    #[test]
    fn test_placeholder_keeps_partial_content() {
        let p = placeholder_with_partial(StepId::News, "feed timeout", "  Headlines so far: chip export rules ");
        assert!(is_placeholder(&p));
        assert!(p.ends_with("\n\nHeadlines so far: chip export rules"));

        let empty = placeholder_with_partial(StepId::News, "feed timeout", "   ");
        assert_eq!(empty, placeholder_report(StepId::News, "feed timeout"));

        // An earlier placeholder is not nested into the new one.
        let again = placeholder_with_partial(StepId::News, "retry failed", &p);
        assert_eq!(again, placeholder_report(StepId::News, "retry failed"));
    }

    #[test]
    fn test_final_report_length() {
        assert!(!is_final_report("", 0));
        assert!(!is_final_report("short", 100));
        assert!(is_final_report(&"x".repeat(100), 100));
        // Whitespace padding does not count.
        assert!(!is_final_report(&format!("  {}  ", "x".repeat(99)), 100));
    }

    #[test]
    fn test_min_len_counts_chars_not_bytes() {
        let report = "涨".repeat(100);
        assert!(meets_min_len(&report, 100));
    }
}
