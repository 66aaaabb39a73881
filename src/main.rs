#![forbid(unsafe_code)]

use error_iter::ErrorIter as _;
use is_terminal::IsTerminal as _;
use lotcount::basis::{evaluate, parse_tax_year, CheckList, Country, Jurisdiction, Principle};
use lotcount::imports::ledger::read_operations;
use lotcount::model::{constants, ExchangeRates, HoldingsWorksheet, Stats, Summary, TaxWorksheet};
use lotcount::util::year_ext::CheckYearsExt as _;
use onlyargs::CliError;
use onlyargs_derive::OnlyArgs;
use std::collections::BTreeSet;
use std::{env, fmt::Display, path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

#[derive(Debug, OnlyArgs)]
#[footer = "Additional environment variables:"]
#[footer = "  - RUST_LOG configures log filtering, e.g. `RUST_LOG=debug`"]
#[footer = "  - RAYON_NUM_THREADS sets how many assets are evaluated concurrently"]
#[footer = "      default is the number of logical CPUs"]
#[footer = "  - TERM_COLOR accepts \"always\" to override automatic terminal sensing"]
struct Args {
    /// Read normalized ledger CSV from a file.
    ///   Columns: time,platform,type,amount,asset[,remark]
    ///
    #[long]
    input_ledger: Vec<PathBuf>,

    /// Calendar year to evaluate.
    tax_year: String,

    /// Country whose tax rules apply. Only "germany" is known.
    #[default("germany")]
    country: String,

    /// Override the country's accounting principle: "fifo" or "lifo".
    #[long]
    principle: Option<String>,

    /// Override default Exchange Rates database directory.
    ///   Default is "./references/exchange-rates-db/".
    ///
    exchange_rates_db: Option<PathBuf>,

    /// Write worksheet CSVs to this output directory.
    #[short('o')]
    worksheet_path: Option<PathBuf>,

    /// Worksheet CSVs written to an output directory will be given
    ///   this prefix.
    #[short('p')]
    #[default("")]
    worksheet_prefix: String,

    /// Enable verbose output.
    /// Prints the holdings CSV table and stats to stdout when not written to a file.
    verbose: bool,
}

#[derive(Debug, Error)]
enum Error {
    #[error("Argument parsing error")]
    Args(#[from] CliError),

    #[error("Invalid configuration")]
    Configuration(#[from] lotcount::errors::ConfigurationError),

    #[error("Unable to load ExchangeRates DataBase")]
    ExchangeRatesDb(#[from] lotcount::errors::ExchangeRatesDbError),

    #[error("Failed to import ledger")]
    Import(#[from] lotcount::errors::LedgerError),

    #[error("Input data has operations after tax year {0}: found {1:?}")]
    InvalidYear(i32, BTreeSet<i32>),

    #[error("CheckList determined some assets could not be evaluated")]
    CheckList(#[from] lotcount::errors::CheckListError),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

fn main() -> ExitCode {
    // Uses the `RUST_LOG` environment var for configuration. E.g. `RUST_LOG=debug cargo run`
    //
    // See: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/struct.EnvFilter.html#directives
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let term_color = env::var("TERM_COLOR")
        .map(|color| color == "always")
        .unwrap_or_else(|_| std::io::stdout().is_terminal());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(term_color))
        .with(env_filter)
        .init();

    match run(onlyargs::parse()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            for source in err.sources().skip(1) {
                eprintln!("  Caused by: {source}");
            }

            ExitCode::FAILURE
        }
    }
}

fn run(args: Result<Args, CliError>) -> Result<(), Error> {
    let args = args?;

    let country: Country = args.country.parse()?;
    let tax_year = parse_tax_year(&args.tax_year)?;
    let mut jurisdiction = Jurisdiction::new(country, tax_year);
    if let Some(principle) = args.principle.as_deref() {
        jurisdiction = jurisdiction.with_principle(principle.parse::<Principle>()?);
    }
    info!(
        "Evaluating {tax_year} for {country} ({principle}, reporting in {fiat})",
        principle = jurisdiction.principle,
        fiat = jurisdiction.fiat,
    );

    let exchange_rates_db = match args.exchange_rates_db.as_ref() {
        Some(path) => ExchangeRates::new(path)?,
        None => ExchangeRates::new(constants::DEFAULT_PATH_EXCHANGE_RATES_DB)?,
    };

    let mut stats = Stats::default();
    let mut operations = Vec::new();
    for input_ledger in &args.input_ledger {
        debug!("Reading ledger {input_ledger:?}");
        operations.extend(read_operations(&mut stats, input_ledger)?);
    }
    if operations.is_empty() {
        warn!("No operations to evaluate");
    }

    // Earlier years are needed for their acquisitions; later years cannot be evaluated yet.
    if let Some(first_year) = operations.get_first_year() {
        debug!("Ledger data starts in {first_year}");
    }
    if let Err(years) = operations.check_years(tax_year) {
        eprintln!("❌ Operations found after the tax year:");
        eprintln!("  Expected {tax_year} or earlier, found {years:?}");
        eprintln!();

        return Err(Error::InvalidYear(tax_year, years));
    }

    let evaluation = evaluate(operations, &jurisdiction, &exchange_rates_db);
    let evaluations = CheckList::execute(evaluation)?;

    for evaluation in &evaluations {
        stats.inc_assets();
        stats.add_tax_events(evaluation.tax_events.len());
        stats.add_residual_lots(evaluation.holdings.len());
    }

    let worksheet = TaxWorksheet::new(&evaluations, &jurisdiction);
    write_worksheet(&args, "tax-events", "Tax Events Worksheet", &worksheet, true)?;

    let holdings = HoldingsWorksheet::new(&evaluations, &jurisdiction, &exchange_rates_db);
    write_worksheet(&args, "holdings", "Holdings Worksheet", &holdings, args.verbose)?;

    let summary = Summary::new(&evaluations, &jurisdiction, &holdings);
    println!("{summary}");

    if args.verbose {
        stats.pretty_print();
    }

    Ok(())
}

/// Write a worksheet to the output directory, or print it when no directory is given.
fn write_worksheet(
    args: &Args,
    name: &str,
    title: &str,
    worksheet: &impl Display,
    print: bool,
) -> Result<(), Error> {
    if let Some(root) = args.worksheet_path.as_ref() {
        let path = root.join(format!("{}{name}.csv", args.worksheet_prefix));
        std::fs::write(&path, worksheet.to_string())?;

        let heading = format!("{title} written to {}", path.display());
        println!("{heading}");
        println!("{}", underline(&heading));
        println!();
    } else if print {
        println!("{title}");
        println!("{}", underline(title));
        println!();
        println!("{worksheet}");
        println!();
    }

    Ok(())
}

/// Underline each word of a heading, e.g. "Tax Events" becomes "=== ======".
fn underline(heading: &str) -> String {
    heading
        .split(' ')
        .map(|word| "=".repeat(word.chars().count()))
        .collect::<Vec<_>>()
        .join(" ")
}
