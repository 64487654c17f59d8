//! Pattern engine: compiler and matcher for parsing expression grammars.
//!
//! Patterns compile into a [`PatternArena`]; a [`Matcher`] runs them against
//! a [`Source`](crate::Source), producing [`Match`](crate::Match) trees.
//!
//! # Pattern syntax
//!
//! | Token              | Meaning                                          |
//! |--------------------|--------------------------------------------------|
//! | `"text"` `'text'`  | Literal                                          |
//! | `{text}`           | Literal between word boundaries                  |
//! | `` `c ``           | One character                                    |
//! | `` `a-z ``         | Byte range; `` `a,x-z `` lists alternatives       |
//! | `\n` `\x1F`        | Escaped byte; `\x00-\x1F` escaped range          |
//! | `\N`               | Newline keeping the current indentation          |
//! | `\i` `\I`          | Identifier character / identifier start          |
//! | `.`                | Any character except newline                     |
//! | `..p`              | Up to (not including) `p` on the same line       |
//! | `..%s p`           | Up to `p`, stepping over `s`                     |
//! | `..=a p`           | Up to `p`, where only `a` may be stepped over    |
//! | `&p`               | Up to and including `p`                          |
//! | `!p`               | Not `p` (zero width)                             |
//! | `>p` `<p`          | Lookahead / fixed-width lookbehind               |
//! | `*p` `+p`          | Zero or more / one or more                       |
//! | `N p` `N-M p`      | Exactly N / between N and M                      |
//! | `N+ p` `-M p`      | At least N / at most M                           |
//! | `... % s`          | Repetition separated by `s`                      |
//! | `[p]`              | Optional                                         |
//! | `(p)`              | Grouping                                         |
//! | `(!) p => "msg"`   | Error marker                                     |
//! | `@p`               | Capture                                          |
//! | `@x=p` `@[x]p`     | Named capture, usable as `x` later in the chain  |
//! | `^` `$`            | Start / end of line                              |
//! | `^^` `$$`          | Start / end of input                             |
//! | `\|` `\b`          | Word boundary                                    |
//! | `name`             | Rule reference                                   |
//! | `a == b` `a != b`  | `b` matches all / not all of `a`'s text          |
//! | `a ~ b` `a !~ b`   | `b` matches / doesn't match inside `a`'s text     |
//! | `a b`              | Sequence                                         |
//! | `p => "tmpl"`      | Replacement                                      |
//! | `a / b`            | Ordered choice                                   |

pub mod ast;
pub mod char_class;
pub mod matcher;
pub mod parser;


pub use ast::{PatId, PatKind, Pattern, PatternArena, TextTest};
pub use matcher::{MatchError, MatchOptions, Matcher, Matches};
pub use parser::{
    CompileError, CompileErrorKind, compile_grammar, compile_grammar_source, compile_pattern,
    compile_pattern_source, compile_replacement, compile_string_pattern,
};
