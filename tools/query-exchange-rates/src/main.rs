#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use error_iter::ErrorIter as _;
use lotcount::model::{AssetSymbol, ExchangeRates, PriceOracle as _, Quantity};
use onlyargs::{CliError, OnlyArgs as _};
use onlyargs_derive::OnlyArgs;
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;

#[derive(Debug, Error)]
enum Error {
    #[error("CLI error")]
    Cli(#[from] CliError),

    #[error("DateTime parsing error")]
    DateTime(#[from] chrono::ParseError),

    #[error("Amount parsing error")]
    Amount(#[from] lotcount::errors::ParseAmountError),

    #[error("Exchange Rates DB error")]
    ExchangeRatesDB(#[from] lotcount::errors::ExchangeRatesDbError),

    #[error("Exchange Rate error")]
    ExchangeRate(#[from] lotcount::errors::ExchangeRateError),
}

/// Query the lotcount exchange rates DB.
#[derive(Debug, OnlyArgs)]
struct Args {
    /// Asset symbol.
    #[default("BTC")]
    asset: String,

    /// Reference currency symbol.
    #[default("EUR")]
    reference: String,

    /// Platform, for platform-specific rates.
    #[default("")]
    platform: String,

    /// Amount of the asset to value.
    #[default("1")]
    quantity: String,

    /// Lookup date.
    date: String,

    /// Path to exchange rates DB.
    #[default("./references/exchange-rates-db/")]
    exchange_rates_db: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(err, Error::Cli(_)) {
                eprintln!("{}", Args::HELP);
            }

            eprintln!("Error: {err}");
            for source in err.sources().skip(1) {
                eprintln!("  Caused by: {source}");
            }

            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Error> {
    let args: Args = onlyargs::parse()?;

    let asset = AssetSymbol::new(&args.asset);
    let reference = AssetSymbol::new(&args.reference);
    let quantity: Quantity = args.quantity.parse()?;
    let date: DateTime<Utc> = args.date.parse()?;
    let exchange_rates_db = ExchangeRates::new(args.exchange_rates_db)?;
    let price = exchange_rates_db.price(&args.platform, &asset, date, &reference)?;

    println!("asset:\t{asset}");
    println!("date:\t{date}");
    println!("price:\t{price} {reference}");
    println!("value:\t{} {reference}", quantity.value_at(price));

    Ok(())
}
