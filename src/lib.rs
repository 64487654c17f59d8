//! A parsing expression grammar engine.
//!
//! Patterns and grammars compile into an arena of pattern nodes, which are
//! matched against byte buffers with ordered choice, captures, lookaround,
//! backreferences and left-recursive rules.
//!
//! # Example
//!
//! ```rust
//! use bpeg::{Definitions, Matcher, PatternArena, Source, compile_grammar, compile_pattern, render};
//!
//! let mut arena = PatternArena::new();
//! let rules = compile_grammar(&mut arena, r#"sum: sum "+" int / int; int: +`0-9"#).unwrap();
//! let defs = Definitions::new().extend(rules);
//!
//! let pat = compile_pattern(&mut arena, r#"@[total]sum => "(@total)""#).unwrap();
//! let text = Source::synthesize("input", "x = 1+2+3;");
//! let m = Matcher::new(&arena, &defs, &text).find_next(pat, None).unwrap().unwrap();
//!
//! assert_eq!((m.start, m.end), (4, 9));
//! assert_eq!(render(&arena, &text, &m), b"(1+2+3)");
//! ```

pub mod api;
mod definitions;
pub mod diagnostics;
pub mod explain;
pub mod grammar;
pub mod json;
mod match_tree;
pub mod pattern;
pub mod render;
mod source;

pub use definitions::Definitions;
pub use grammar::Grammar;
pub use match_tree::{CaptureId, Match};
pub use pattern::{
    CompileError, CompileErrorKind, MatchError, MatchOptions, Matcher, Matches, PatId, PatternArena,
    compile_grammar, compile_pattern, compile_replacement, compile_string_pattern,
};
pub use render::{Context, Printer, render};
pub use source::{Source, SourceError};
