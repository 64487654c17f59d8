//! Grammar loading: the built-in rules, user grammar files and `-d` style
//! definitions, collected into one arena and definition table.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::definitions::Definitions;
use crate::diagnostics;
use crate::pattern::ast::{PatId, PatternArena};
use crate::pattern::matcher::Matcher;
use crate::pattern::parser::{self, CompileError};
use crate::source::Source;

/// Rules available to every pattern unless disabled.
pub const BUILTIN_GRAMMAR: &str = include_str!("../grammars/builtins.bp");

/// Extension of grammar files in the user grammar directory.
const GRAMMAR_EXT: &str = "bp";

/// Compiled patterns plus the definitions visible to them.
#[derive(Debug, Default)]
pub struct Grammar {
    arena: PatternArena,
    defs: Definitions,
}

fn compile_failure(source: &Source, err: CompileError) -> anyhow::Error {
    anyhow!(diagnostics::report(source, err.start, err.end, &err.message))
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    /// A grammar holding the built-in rules.
    pub fn with_builtins() -> Result<Self> {
        let mut grammar = Grammar::new();
        grammar.load_source(Source::synthesize("<builtins>", BUILTIN_GRAMMAR))?;
        Ok(grammar)
    }

    pub fn arena(&self) -> &PatternArena {
        &self.arena
    }

    pub fn definitions(&self) -> &Definitions {
        &self.defs
    }

    /// Compile `source` as a grammar; its rules shadow earlier ones.
    pub fn load_source(&mut self, source: Source) -> Result<()> {
        let rules = parser::compile_grammar_source(&mut self.arena, source.clone())
            .map_err(|err| compile_failure(&source, err))?;
        log::debug!("loaded {} rules from {}", rules.len(), source.name());
        self.defs = self.defs.extend(rules);
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let name = path.to_string_lossy();
        let source = Source::load(&name).with_context(|| format!("Couldn't load grammar {name}"))?;
        self.load_source(source)
    }

    /// Load `files` in order. If any of them fails, none of their rules stay
    /// visible.
    pub fn load_files(&mut self, files: &[PathBuf]) -> Result<()> {
        let mark = self.defs.mark();
        for file in files {
            if let Err(err) = self.load_file(file) {
                self.defs = self.defs.pop_to(&mark);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Load every grammar file in the user grammar directory, in name order.
    /// A missing directory is not an error, and a broken file only disables
    /// the user grammars with a warning.
    pub fn load_user_grammars(&mut self) -> Result<()> {
        let Some(dir) = user_grammar_dir() else {
            return Ok(());
        };
        if !dir.is_dir() {
            log::debug!("no user grammars in {}", dir.display());
            return Ok(());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Couldn't read {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == GRAMMAR_EXT))
            .collect();
        files.sort();
        if let Err(err) = self.load_files(&files) {
            log::warn!("ignoring user grammars in {}: {err:#}", dir.display());
        }
        Ok(())
    }

    /// Add a `name:pattern` definition.
    pub fn define(&mut self, definition: &str) -> Result<()> {
        if !definition.contains(':') {
            anyhow::bail!("Definitions should look like 'name:pattern', not '{definition}'.");
        }
        self.load_source(Source::synthesize("<definition>", definition))
    }

    /// Compile a pattern in full pattern syntax.
    pub fn compile_pattern(&mut self, text: &str) -> Result<PatId> {
        let source = Source::synthesize("<pattern>", text);
        parser::compile_pattern_source(&mut self.arena, source.clone())
            .map_err(|err| compile_failure(&source, err))
    }

    /// Compile text that is literal except for `\` interpolations.
    pub fn compile_string_pattern(&mut self, text: &str) -> Result<PatId> {
        parser::compile_string_pattern(&mut self.arena, text)
            .map_err(|err| compile_failure(&Source::synthesize("<pattern>", text), err))
    }

    pub fn compile_replacement(&mut self, pat: PatId, template: &str) -> Result<PatId> {
        parser::compile_replacement(&mut self.arena, pat, template)
            .map_err(|err| compile_failure(&Source::synthesize("<replacement>", template), err))
    }

    /// A matcher over `source` using these definitions.
    pub fn matcher<'a>(&'a self, source: &'a Source) -> Matcher<'a> {
        Matcher::new(&self.arena, &self.defs, source)
    }
}

/// `$XDG_CONFIG_HOME/bpeg`, or `~/.config/bpeg`.
pub fn user_grammar_dir() -> Option<PathBuf> {
    env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .map(|dir| dir.join("bpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_compile() {
        let grammar = Grammar::with_builtins().unwrap();
        for name in ["id", "int", "number", "ws", "nl", "parens", "braces", "brackets", "string", "word"] {
            assert!(grammar.definitions().lookup(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn definitions_shadow_builtins() {
        let mut grammar = Grammar::with_builtins().unwrap();
        let before = grammar.definitions().lookup("int");
        grammar.define("int: \"zero\"").unwrap();
        assert_ne!(grammar.definitions().lookup("int"), before);
    }

    #[test]
    fn bad_definition_reports_location() {
        let mut grammar = Grammar::new();
        let err = grammar.define("x: (\"a\"").unwrap_err().to_string();
        assert!(err.starts_with("<definition>:1: "), "{err}");
        assert!(err.contains('^'));
        assert!(grammar.define("no colon").is_err());
    }

    #[test]
    fn pattern_errors_use_diagnostics() {
        let mut grammar = Grammar::new();
        let err = grammar.compile_pattern("\"abc").unwrap_err().to_string();
        assert!(err.contains("<pattern>:1: This string doesn't have a closing quote."));
    }

    #[test]
    fn failed_batch_leaves_no_rules() {
        let dir = env::temp_dir().join(format!("bpeg-grammar-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.bp");
        fs::write(&good, "extra: \"x\"").unwrap();
        let missing = dir.join("missing.bp");

        let mut grammar = Grammar::new();
        grammar.define("base: \"b\"").unwrap();
        assert!(grammar.load_files(&[good.clone(), missing]).is_err());
        assert!(grammar.definitions().lookup("extra").is_none());
        assert!(grammar.definitions().lookup("base").is_some());

        grammar.load_files(&[good]).unwrap();
        assert!(grammar.definitions().lookup("extra").is_some());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn builtin_rules_match() {
        let mut grammar = Grammar::with_builtins().unwrap();
        let pat = grammar.compile_pattern("id \"=\" number").unwrap();
        let src = Source::synthesize("t", "x_1=3.25;");
        let m = grammar.matcher(&src).match_at(pat, 0).unwrap().unwrap();
        assert_eq!(m.end, 8);

        let parens = grammar.compile_pattern("parens").unwrap();
        let src = Source::synthesize("t", "(a (b \")\") c) d");
        let m = grammar.matcher(&src).match_at(parens, 0).unwrap().unwrap();
        assert_eq!(m.end, 13);
    }
}
