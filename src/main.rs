use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use treelox as lox;

use lox::ast_printer::AstPrinter;
use lox::error::LoxError;
use lox::interpreter::Interpreter;
use lox::parser::{Parser, Stmt};
use lox::resolver::Resolver;
use lox::scanner::Scanner;
use lox::token::Token;

#[derive(ClapParser, Debug)]
#[command(version, about = "Tree-walking Lox interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Option<Commands>,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes a source file, printing each token
    Tokenize { filename: PathBuf },

    /// Parses a source file and prints its syntax tree
    Parse {
        filename: PathBuf,

        /// Dump the tree as JSON instead of the prefix form
        #[arg(long)]
        json: bool,
    },

    /// Runs a source file as a Lox program
    Run { filename: PathBuf },

    /// Starts an interactive session (the default)
    Repl,
}

/// Source bytes for one invocation. Files are memory-mapped; the empty
/// file cannot be mapped and gets an owned buffer instead.
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    fn bytes(&self) -> &[u8] {
        match self {
            Source::Mapped(mmap) => mmap,
            Source::Owned(buf) => buf,
        }
    }
}

/// Memory-maps a source file and validates it as UTF-8 once; the scanner
/// operates on the raw bytes thereafter.
fn read_source(filename: &PathBuf) -> Result<Source> {
    info!("Mapping file: {:?}", filename);

    let file: File =
        File::open(filename).context(format!("Failed to open file {:?}", filename))?;

    let length: u64 = file
        .metadata()
        .context(format!("Failed to stat file {:?}", filename))?
        .len();

    if length == 0 {
        info!("File {:?} is empty, skipping mmap", filename);

        return Ok(Source::Owned(Vec::new()));
    }

    // The mapping is treated as immutable for the life of the process.
    let mmap: Mmap = unsafe { Mmap::map(&file) }
        .context(format!("Failed to memory-map file {:?}", filename))?;

    std::str::from_utf8(&mmap).context(format!("File {:?} is not valid UTF-8", filename))?;

    info!("Mapped {} bytes from {:?}", mmap.len(), filename);

    Ok(Source::Mapped(mmap))
}

/// Scans a whole buffer, separating tokens from lexical errors.
fn scan_all(source: &[u8]) -> (Vec<Token<'_>>, Vec<LoxError>) {
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut errors: Vec<LoxError> = Vec::new();

    for item in Scanner::new(source) {
        match item {
            Ok(token) => tokens.push(token),
            Err(e) => errors.push(e),
        }
    }

    (tokens, errors)
}

fn init_logger() -> Result<()> {
    // Create or open the log file
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    // Configure env_logger to write to file with module path and source line
    Builder::new()
        .format(|buf, record| {
            // Strip 'treelox::' from module path
            let module = record
                .module_path()
                .unwrap_or("<unnamed>")
                .strip_prefix("treelox::")
                .unwrap_or(record.module_path().unwrap_or("<unnamed>"));
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug) // Default to Debug, override with RUST_LOG
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        // Initialize a minimal logger to avoid "no logger" errors
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Some(Commands::Tokenize { filename }) => {
            info!("Running Tokenize subcommand");

            let source: Source = read_source(&filename)?;
            let mut tokenized: bool = true;

            for item in Scanner::new(source.bytes()) {
                match item {
                    Ok(token) => {
                        debug!("Scanned token: {}", token);

                        println!("{}", token);
                    }

                    Err(e) => {
                        tokenized = false;

                        debug!("Tokenization debug: {}", e);

                        eprintln!("{}", e);
                    }
                }
            }

            if !tokenized {
                debug!("Tokenization failed, exiting with code 65");

                std::process::exit(65);
            }

            info!("Tokenization completed successfully");
        }

        Some(Commands::Parse { filename, json }) => {
            info!("Running Parse subcommand");

            let source: Source = read_source(&filename)?;
            let (tokens, scan_errors) = scan_all(source.bytes());

            if !scan_errors.is_empty() {
                for e in &scan_errors {
                    eprintln!("{}", e);
                }

                std::process::exit(65);
            }

            let mut parser = Parser::new(&tokens);

            match parser.parse() {
                Ok(statements) => {
                    info!("Parsed {} statements", statements.len());

                    if json {
                        println!("{}", serde_json::to_string_pretty(&statements)?);
                    } else {
                        println!("{}", AstPrinter::print_program(&statements));
                    }
                }

                Err(errors) => {
                    for e in &errors {
                        eprintln!("{}", e);
                    }

                    std::process::exit(65);
                }
            }

            info!("Parse subcommand completed");
        }

        Some(Commands::Run { filename }) => {
            info!("Running Run subcommand");

            let source: Source = read_source(&filename)?;
            let (tokens, scan_errors) = scan_all(source.bytes());

            if !scan_errors.is_empty() {
                for e in &scan_errors {
                    eprintln!("{}", e);
                }

                std::process::exit(65);
            }

            let mut parser = Parser::new(&tokens);

            let statements = match parser.parse() {
                Ok(statements) => statements,

                Err(errors) => {
                    for e in &errors {
                        eprintln!("{}", e);
                    }

                    std::process::exit(65);
                }
            };

            info!("Parsed {} statements", statements.len());

            let mut interpreter = Interpreter::new();

            {
                let mut resolver = Resolver::new(&mut interpreter);

                if let Err(errors) = resolver.resolve(&statements) {
                    for e in &errors {
                        eprintln!("{}", e);
                    }

                    std::process::exit(65);
                }
            }

            match interpreter.interpret(&statements) {
                Ok(_) => {
                    info!("Program executed successfully");
                }

                Err(e) => {
                    debug!("Runtime debug: {}", e);

                    eprintln!("{}", e);

                    std::process::exit(70);
                }
            }
        }

        Some(Commands::Repl) | None => {
            repl()?;
        }
    }

    Ok(())
}

/// Interactive session: one persistent interpreter, one line per turn.
///
/// Each line's buffer is leaked so the session's accumulated definitions
/// and resolution annotations can keep borrowing its lexemes; a session
/// leaks only what it has actually typed.
fn repl() -> Result<()> {
    println!(
        "treelox {} interactive session (Ctrl-D or an empty line to exit)",
        env!("CARGO_PKG_VERSION")
    );

    let mut interpreter: Interpreter<'static> = Interpreter::new();
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        let mut line = String::new();

        let read: usize = stdin
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;

        if read == 0 {
            // EOF
            break;
        }

        let trimmed: &str = line.trim();

        if trimmed.is_empty() {
            break;
        }

        // A bare expression still forms a statement: terminate the line
        // unless it already ends in ';' or a block.
        let mut source: String = trimmed.to_string();

        if !(source.ends_with(';') || source.ends_with('}')) {
            source.push(';');
        }

        let src: &'static [u8] = Box::leak(source.into_bytes().into_boxed_slice());

        let (tokens, scan_errors) = scan_all(src);

        if !scan_errors.is_empty() {
            for e in &scan_errors {
                eprintln!("{}", e);
            }

            continue;
        }

        let mut parser = Parser::new(&tokens);

        let statements: Vec<Stmt<'static>> = match parser.parse() {
            Ok(statements) => statements,

            Err(errors) => {
                for e in &errors {
                    eprintln!("{}", e);
                }

                continue;
            }
        };

        {
            let mut resolver = Resolver::new(&mut interpreter);

            if let Err(errors) = resolver.resolve(&statements) {
                for e in &errors {
                    eprintln!("{}", e);
                }

                continue;
            }
        }

        // A runtime error abandons the line but not the session.
        match interpreter.interpret(&statements) {
            Ok(Some(value)) => println!("{}", value),

            Ok(None) => {}

            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}
