//! Box-drawing visualisation of a match tree (`--explain`).
//!
//! ```text
//! "x" ws int  [0..4] "x 12"
//! ├── "x"  [0..1] "x"
//! ├── ws  [1..2] " "
//! └── int  [2..4] "12"
//!     └── +`0-9  [2..4] "12"
//! ```

use crate::match_tree::{Match, with_stack};
use crate::pattern::ast::PatternArena;
use crate::source::Source;

const MAX_SNIPPET: usize = 40;

/// Shorten `text` to at most [`MAX_SNIPPET`] characters with newlines and
/// tabs made visible.
fn snippet(text: &[u8]) -> String {
    let text = String::from_utf8_lossy(text);
    let mut out: String = text
        .chars()
        .take(MAX_SNIPPET)
        .map(|c| match c {
            '\n' => '↵',
            '\t' => '→',
            c => c,
        })
        .collect();
    if text.chars().count() > MAX_SNIPPET {
        out.push('…');
    }
    out
}

/// The tree of `m`, one node per line.
pub fn explain(arena: &PatternArena, source: &Source, m: &Match) -> String {
    let mut out = String::new();
    node(arena, source, m, "", None, &mut out);
    out
}

/// `last` is `None` for the root, otherwise whether this is the final child.
fn node(arena: &PatternArena, source: &Source, m: &Match, prefix: &str, last: Option<bool>, out: &mut String) {
    let branch = match last {
        None => "",
        Some(true) => "└── ",
        Some(false) => "├── ",
    };
    out.push_str(&format!(
        "{prefix}{branch}{}  [{}..{}] \"{}\"\n",
        snippet(arena.text(m.pat)),
        m.start,
        m.end,
        snippet(m.text(source)),
    ));
    let child_prefix = match last {
        None => prefix.to_string(),
        Some(true) => format!("{prefix}    "),
        Some(false) => format!("{prefix}│   "),
    };
    with_stack(|| {
        for (i, child) in m.children.iter().enumerate() {
            let is_last = i + 1 == m.children.len();
            node(arena, source, child, &child_prefix, Some(is_last), out);
        }
    });
}
