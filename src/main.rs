use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use complex_solver::{
    DEFAULT_BRANCH_WINDOW, FailureKind, FormulaCache, PointValues, compile_formula,
    evaluate_points, parse_points,
};
use log::{LevelFilter, Log, Metadata, Record};
use miette::IntoDiagnostic;
use miette::WrapErr;
use miette::miette;

#[derive(Parser, Debug)]
#[command(about = "Evaluate formulas over a complex variable, with every branch")]
struct Args {
    /// Log parsing, compiling and caching to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the tokens of a formula
    Tokenize { formula: String },
    /// Print the parsed tree of a formula
    Parse { formula: String },
    /// Evaluate a formula at the given points
    Eval {
        formula: String,
        /// A point as `label=re,im` or `re,im`
        #[arg(short = 'p', long = "point")]
        points: Vec<String>,
        /// Logarithm branches -N..=N
        #[arg(short, long, default_value_t = DEFAULT_BRANCH_WINDOW)]
        window: u32,
    },
    /// Evaluate every `formula ; point ; point ...` line of a file
    Batch {
        filename: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_BRANCH_WINDOW)]
        window: u32,
    },
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn print_values(prefix: &str, results: &[PointValues]) {
    for result in results {
        let values: Vec<String> = result.values.iter().map(|w| w.to_string()).collect();
        println!("{prefix}{}: {}", result.label, values.join(" "));
    }
}

fn run(command: Commands) -> miette::Result<()> {
    match command {
        Commands::Tokenize { formula } => {
            for token in complex_solver::Lexer::new(&formula) {
                println!("{}", token?);
            }
            println!("EOF  null");
        }
        Commands::Parse { formula } => {
            let expr = complex_solver::Parser::new(&formula)?.parse()?;
            println!("{expr}");
        }
        Commands::Eval {
            formula,
            points,
            window,
        } => {
            let function = compile_formula(&formula)?;
            let points = parse_points(&points)?;
            print_values("", &evaluate_points(&function, &points, window));
        }
        Commands::Batch { filename, window } => {
            let file_contents = fs::read_to_string(&filename)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading `{}` failed", filename.display()))?;

            let cache = FormulaCache::new();
            let mut failures = 0;
            for (number, line) in file_contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let mut fields = line.split(';').map(str::trim);
                let formula = fields.next().unwrap_or_default();
                let points: Vec<&str> = fields.filter(|field| !field.is_empty()).collect();

                let evaluated = cache.get_or_compile(formula).and_then(|function| {
                    let points = parse_points(&points)?;
                    Ok(evaluate_points(&function, &points, window))
                });
                match evaluated {
                    Ok(results) => print_values(&format!("{formula} | "), &results),
                    Err(e) => {
                        failures += 1;
                        eprintln!("{:?}", e.wrap_err(format!("line {}", number + 1)));
                    }
                }
            }
            log::debug!("{} distinct formulas compiled", cache.len());

            if failures > 0 {
                return Err(miette!("{failures} line(s) of `{}` failed", filename.display()));
            }
        }
    }
    Ok(())
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    if args.verbose {
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(LevelFilter::Debug))
            .map_err(|e| miette!("{e}"))?;
    }

    let result = run(args.command);
    if let Err(e) = &result {
        match FailureKind::of(e) {
            Some(FailureKind::BadFormula) => {
                eprintln!("{e:?}");
                std::process::exit(65);
            }
            Some(FailureKind::Unsupported) => {
                eprintln!("{e:?}");
                std::process::exit(70);
            }
            None => {}
        }
    }
    result
}
