//! Human-readable error locations: `file:line: message`, followed by the
//! offending line with the span underlined.

use crate::source::Source;

/// Render a diagnostic for the byte span `[start, end)` of `source`.
///
/// Spans covering several lines are underlined to the end of their first
/// line. An empty span gets a single caret.
pub fn report(source: &Source, start: usize, end: usize, message: &str) -> String {
    let line = source.line_number(start);
    let line_start = source.line_start(line).unwrap_or(0);
    let text = source.line_text(line).unwrap_or_default();
    let col = start.saturating_sub(line_start).min(text.len());
    let width = end
        .saturating_sub(start)
        .min(text.len().saturating_sub(col))
        .max(1);

    format!(
        "{}:{}: {}\n{}\n{}{}\n",
        source.name(),
        line,
        message,
        String::from_utf8_lossy(text).replace('\t', " "),
        " ".repeat(col),
        "^".repeat(width),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_under_span() {
        let src = Source::synthesize("rules.bp", "a: \"x\"\nb: (\"y\"\n");
        let text = report(&src, 10, 14, "This parenthesis group isn't properly closed.");
        assert_eq!(
            text,
            "rules.bp:2: This parenthesis group isn't properly closed.\nb: (\"y\"\n   ^^^^\n"
        );
    }

    #[test]
    fn empty_span_gets_one_caret() {
        let src = Source::synthesize("p", "abc");
        assert_eq!(report(&src, 3, 3, "end"), "p:1: end\nabc\n   ^\n");
    }

    #[test]
    fn multiline_span_clipped_to_first_line() {
        let src = Source::synthesize("p", "ab\ncd");
        assert_eq!(report(&src, 1, 5, "m"), "p:1: m\nab\n ^\n");
    }
}
