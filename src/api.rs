//! String-in, string-out entry points for embedding, e.g. from a scripting
//! language binding. Patterns use the full pattern syntax and can refer to
//! the built-in rules.

use anyhow::{Result, bail};

use crate::grammar::Grammar;
use crate::match_tree::Match;
use crate::render;
use crate::source::Source;

fn check_start(text: &str, start: usize) -> Result<()> {
    if start > text.len() {
        bail!("Start index {start} is past the end of the text ({} bytes).", text.len());
    }
    Ok(())
}

/// The first match of `pattern` at or after byte `start`, as its rendered
/// text, start offset and length in bytes.
pub fn find(text: &str, pattern: &str, start: usize) -> Result<Option<(String, usize, usize)>> {
    check_start(text, start)?;
    let mut grammar = Grammar::with_builtins()?;
    let pat = grammar.compile_pattern(pattern)?;
    let source = Source::synthesize("<text>", text);
    let found = grammar.matcher(&source).find_from(pat, start)?;
    Ok(found.map(|m| {
        let rendered = render::render(grammar.arena(), &source, &m);
        (String::from_utf8_lossy(&rendered).into_owned(), m.start, m.len())
    }))
}

/// Replace every match of `pattern` at or after byte `start` with
/// `replacement` (a template that may use `@1`, `@name` etc.). Returns the
/// new text and the number of replacements made.
pub fn replace(text: &str, pattern: &str, replacement: &str, start: usize) -> Result<(String, usize)> {
    check_start(text, start)?;
    let mut grammar = Grammar::with_builtins()?;
    let pat = grammar.compile_pattern(pattern)?;
    let pat = grammar.compile_replacement(pat, replacement)?;
    let source = Source::synthesize("<text>", text);
    let matcher = grammar.matcher(&source);

    let mut found: Vec<Match> = Vec::new();
    let mut next = matcher.find_from(pat, start)?;
    while let Some(m) = next {
        next = matcher.find_next(pat, Some(&m))?;
        found.push(m);
    }
    let count = found.len();
    let replaced = render::replace_all(grammar.arena(), &source, &found);
    Ok((String::from_utf8_lossy(&replaced).into_owned(), count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_returns_offset_and_length() {
        let found = find("let x = 42;", "int", 0).unwrap();
        assert_eq!(found, Some(("42".to_string(), 8, 2)));
        assert_eq!(find("let x = 42;", "int", 10).unwrap(), None);
    }

    #[test]
    fn find_renders_replacements() {
        let found = find("ab", r#""b" => "B""#, 0).unwrap();
        assert_eq!(found, Some(("B".to_string(), 1, 1)));
    }

    #[test]
    fn replace_counts() {
        let (text, n) = replace("a1 b22 c333", "int", "<@0>", 0).unwrap();
        assert_eq!(text, "a<1> b<22> c<333>");
        assert_eq!(n, 3);
    }

    #[test]
    fn replace_from_start_offset() {
        let (text, n) = replace("x x x", r#""x""#, "y", 2).unwrap();
        assert_eq!(text, "x y y");
        assert_eq!(n, 2);
    }

    #[test]
    fn errors_are_reported() {
        assert!(find("x", "(", 0).is_err());
        assert!(find("x", "undefined-rule", 0).is_err());
        assert!(find("x", "\"x\"", 5).is_err());
        assert!(replace("x", "\"x\"", "\\q", 0).is_err());
    }
}
