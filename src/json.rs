//! JSON output for match trees.

use serde::Serialize;

use crate::match_tree::{Match, with_stack};
use crate::pattern::ast::PatternArena;
use crate::source::Source;

/// One match node as it appears in JSON output.
#[derive(Debug, Serialize)]
pub struct JsonMatch {
    /// The pattern text that produced the match.
    pub rule: String,
    pub start: usize,
    pub end: usize,
    pub children: Vec<JsonMatch>,
}

/// All matches from one input file.
#[derive(Debug, Serialize)]
pub struct JsonFile {
    pub filename: String,
    pub matches: Vec<JsonMatch>,
}

/// Pattern text with newlines shown as a visible marker.
fn visible(text: &[u8]) -> String {
    String::from_utf8_lossy(text).replace('\n', "↵")
}

impl JsonMatch {
    pub fn new(arena: &PatternArena, m: &Match) -> Self {
        JsonMatch {
            rule: visible(arena.text(m.pat)),
            start: m.start,
            end: m.end,
            children: with_stack(|| m.children.iter().map(|c| JsonMatch::new(arena, c)).collect()),
        }
    }
}

impl JsonFile {
    pub fn new(arena: &PatternArena, source: &Source, matches: &[Match]) -> Self {
        JsonFile {
            filename: source.name().to_string(),
            matches: matches.iter().map(|m| JsonMatch::new(arena, m)).collect(),
        }
    }
}

/// Serialize one match tree.
pub fn to_json(arena: &PatternArena, m: &Match) -> serde_json::Result<String> {
    serde_json::to_string(&JsonMatch::new(arena, m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Definitions;
    use crate::pattern::matcher::Matcher;
    use crate::pattern::parser::compile_pattern;

    #[test]
    fn literal_span_is_exact() {
        let mut arena = PatternArena::new();
        let pat = compile_pattern(&mut arena, r#""foo""#).unwrap();
        let src = Source::synthesize("t", "0123456789foo");
        let defs = Definitions::new();
        let m = Matcher::new(&arena, &defs, &src)
            .find_next(pat, None)
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&to_json(&arena, &m).unwrap()).unwrap();
        assert_eq!(value["start"], 10);
        assert_eq!(value["end"], 13);
        assert_eq!(value["rule"], "\"foo\"");
        assert_eq!(value["children"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn nested_children_and_newline_marker() {
        let mut arena = PatternArena::new();
        let pat = compile_pattern(&mut arena, "@(\"a\"\n\"b\")").unwrap();
        let src = Source::synthesize("t", "ab");
        let defs = Definitions::new();
        let m = Matcher::new(&arena, &defs, &src).match_at(pat, 0).unwrap().unwrap();
        let file = JsonFile::new(&arena, &src, std::slice::from_ref(&m));
        let text = serde_json::to_string(&file).unwrap();
        assert!(text.contains("\"filename\":\"t\""));
        assert!(text.contains('↵'));
        assert_eq!(file.matches[0].children.len(), 1);
    }
}
