use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context as _, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use crossterm::tty::IsTty;
use log::LevelFilter;

use bpeg::explain::explain;
use bpeg::json::JsonFile;
use bpeg::pattern::matcher::DEFAULT_MAX_DEPTH;
use bpeg::{Context, Grammar, Match, MatchOptions, Printer, Source, diagnostics};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Text to search for; `\` introduces an embedded pattern
    #[arg(value_name = "PATTERN")]
    text: Option<String>,

    /// Files to search (`-` or none for standard input)
    #[arg(value_name = "FILES")]
    files: Vec<String>,

    /// Search with a pattern in full pattern syntax instead of PATTERN
    #[arg(short = 'p', long, value_name = "PATTERN")]
    pattern: Option<String>,

    /// Replace matches using this template
    #[arg(short = 'r', long, value_name = "TEMPLATE")]
    replace: Option<String>,

    /// Load rules from a grammar file
    #[arg(short = 'g', long, value_name = "FILE")]
    grammar: Vec<String>,

    /// Define a rule, as `name:pattern`
    #[arg(short = 'd', long, value_name = "DEFINITION")]
    define: Vec<String>,

    /// Skip over text matching this pattern while searching
    #[arg(short = 's', long, value_name = "PATTERN")]
    skip: Option<String>,

    /// Ignore ASCII case
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Only print the names of files with matches
    #[arg(short = 'l', long)]
    list_files: bool,

    /// Print match trees as JSON
    #[arg(short = 'j', long)]
    json: bool,

    /// Print match trees as diagrams
    #[arg(short = 'e', long)]
    explain: bool,

    /// Lines of context to print: a number, `all` or `none`
    #[arg(short = 'c', long, value_name = "N", default_value = "0")]
    context: Context,

    /// Print line numbers
    #[arg(short = 'n', long)]
    line_numbers: bool,

    /// Give up on patterns nested deeper than this while matching
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Colour output
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorChoice,

    /// Don't load the built-in or user grammars
    #[arg(long)]
    no_builtins: bool,

    /// Log more (repeat for more detail)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.init();
}

fn load_grammar(args: &Args) -> Result<Grammar> {
    let mut grammar = if args.no_builtins {
        Grammar::new()
    } else {
        let mut grammar = Grammar::with_builtins()?;
        grammar.load_user_grammars()?;
        grammar
    };
    for file in &args.grammar {
        grammar.load_file(Path::new(file))?;
    }
    for definition in &args.define {
        grammar.define(definition)?;
    }
    Ok(grammar)
}

fn run(args: Args) -> Result<ExitCode> {
    let mut grammar = load_grammar(&args)?;

    // With `-p`, the first positional argument is a file, not a pattern.
    let (pat, mut files) = match (&args.pattern, args.text) {
        (Some(pattern), first) => {
            let files: Vec<String> = first.into_iter().chain(args.files).collect();
            (grammar.compile_pattern(pattern)?, files)
        }
        (None, Some(text)) => (grammar.compile_string_pattern(&text)?, args.files),
        (None, None) => bail!("No pattern was given. Pass PATTERN or use --pattern."),
    };
    let pat = match &args.replace {
        Some(template) => grammar.compile_replacement(pat, template)?,
        None => pat,
    };
    let skip = args
        .skip
        .as_deref()
        .map(|skip| grammar.compile_pattern(skip))
        .transpose()?;
    if files.is_empty() {
        files.push("-".to_string());
    }

    let options = MatchOptions {
        ignore_case: args.ignore_case,
        max_depth: args.max_depth,
        ..MatchOptions::default()
    };
    let printer = Printer {
        color: match args.color {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stdout().is_tty(),
        },
        line_numbers: args.line_numbers,
        context: args.context,
    };
    let arena = grammar.arena();
    let mut out = BufWriter::new(io::stdout().lock());
    let mut matched = false;
    let mut failed = false;

    for name in &files {
        let source = match Source::load(name) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("{err}");
                failed = true;
                continue;
            }
        };
        let matches: Vec<Match> = grammar
            .matcher(&source)
            .with_options(options)
            .with_skip(skip)
            .matches(pat)
            .collect::<Result<_, _>>()
            .with_context(|| format!("Matching failed in {}", source.name()))?;
        if matches.is_empty() {
            continue;
        }
        matched = true;

        let errors: Vec<&Match> = matches.iter().flat_map(|m| m.errors(arena)).collect();
        for error in &errors {
            let message = error.error_message(arena, &source);
            eprint!("{}", diagnostics::report(&source, error.start, error.end, &message));
        }
        if !errors.is_empty() {
            eprintln!("{} error(s) found in {}", errors.len(), source.name());
        }

        if args.list_files {
            writeln!(out, "{}", source.name())?;
        } else if args.json {
            serde_json::to_writer(&mut out, &JsonFile::new(arena, &source, &matches))?;
            writeln!(out)?;
        } else if args.explain {
            for m in &matches {
                write!(out, "{}", explain(arena, &source, m))?;
            }
        } else {
            if files.len() > 1 && printer.context != Context::All {
                printer.print_header(&mut out, source.name())?;
            }
            printer.print_matches(&mut out, arena, &source, &matches)?;
        }
    }
    out.flush()?;

    Ok(if failed {
        ExitCode::from(2)
    } else if matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}
