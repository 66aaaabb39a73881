use crate::model::amount::{FiatAmount, Quantity};
use crate::model::operation::{AssetSymbol, Operation};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::{ffi::OsStr, fs, path::Path, path::PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Exchange rate lookup failures.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Debug, Error)]
pub enum ExchangeRateError {
    #[error("No {0}/{1} exchange rate exists at {2}")]
    NotFound(AssetSymbol, AssetSymbol, DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum ExchangeRatesDbError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("RON parsing error in {0:?}")]
    Parse(PathBuf, #[source] ron::de::SpannedError),

    #[error("DB has an invalid aggregation granularity")]
    InvalidGranularity,
}

/// Supplies the monetary value of operations in a reference currency.
///
/// Implementations must be deterministic for a given `(platform, asset, time)`. They are shared
/// across the per-asset workers, hence the `Sync` bound.
pub trait PriceOracle: Sync {
    /// Unit price of `asset` in `reference` at `time`.
    fn price(
        &self,
        platform: &str,
        asset: &AssetSymbol,
        time: DateTime<Utc>,
        reference: &AssetSymbol,
    ) -> Result<Decimal, ExchangeRateError>;

    /// Value of the whole operation.
    fn cost(
        &self,
        operation: &Operation,
        reference: &AssetSymbol,
    ) -> Result<FiatAmount, ExchangeRateError> {
        self.partial_cost(operation, operation.amount(), reference)
    }

    /// Value of `amount` units of the operation's asset, priced at the operation's time and
    /// platform.
    fn partial_cost(
        &self,
        operation: &Operation,
        amount: Quantity,
        reference: &AssetSymbol,
    ) -> Result<FiatAmount, ExchangeRateError> {
        let price = if operation.asset() == reference {
            Decimal::ONE
        } else {
            self.price(
                operation.platform(),
                operation.asset(),
                operation.time(),
                reference,
            )?
        };

        Ok(amount.value_at(price))
    }
}

pub type ExchangeRateMap = BTreeMap<i64, Decimal>;

type Pair = (AssetSymbol, AssetSymbol);

/// Exchange rates loaded from a directory of RON files.
#[derive(Debug, Default)]
pub struct ExchangeRates {
    /// Timestamp granularity.
    ///
    /// Must be equal to the interval between each timestamp in the keys, minus 1 second.
    granularity: i64,

    generic: HashMap<Pair, ExchangeRateMap>,
    by_platform: HashMap<(String, Pair), ExchangeRateMap>,
}

impl ExchangeRates {
    /// Create an ExchangeRates DB from the given directory path.
    ///
    /// File stems are `<asset>-<reference>` for rates valid on any platform, or
    /// `<platform>-<asset>-<reference>` for platform-specific rates. The platform
    /// is everything before the last two hyphens, e.g. `coinbase-pro-btc-eur`.
    pub fn new<P>(path: P) -> Result<Self, ExchangeRatesDbError>
    where
        P: AsRef<Path>,
    {
        let mut db = Self::default();

        for entry in fs::read_dir(path.as_ref())? {
            let entry = entry?;
            let path = entry.path();

            if !path.is_file() || path.extension() != Some(OsStr::new("ron")) {
                continue;
            }
            let name = match path.file_stem().and_then(OsStr::to_str) {
                Some(name) => name,
                None => continue,
            };

            // Platform names may contain hyphens, asset symbols may not.
            let mut parts: Vec<_> = name.rsplitn(3, '-').collect();
            parts.reverse();
            match parts.as_slice() {
                [asset, reference] => {
                    debug!("Loading {asset}/{reference} exchange rates from {path:?}");
                    db.generic
                        .entry((AssetSymbol::new(asset), AssetSymbol::new(reference)))
                        .or_default()
                        .extend(read_ron(&path)?);
                }
                [platform, asset, reference] => {
                    debug!("Loading {platform} {asset}/{reference} exchange rates from {path:?}");
                    let pair = (AssetSymbol::new(asset), AssetSymbol::new(reference));
                    db.by_platform
                        .entry((platform.to_lowercase(), pair))
                        .or_default()
                        .extend(read_ron(&path)?);
                }
                _ => warn!("Ignoring exchange rates file with unrecognized name: {path:?}"),
            }
        }

        if db.generic.is_empty() && db.by_platform.is_empty() {
            warn!("Exchange rates DB is empty; only fiat self-valuations will succeed");
            return Ok(db);
        }

        for map in db.generic.values().chain(db.by_platform.values()) {
            db.granularity = check_granularity(map, db.granularity)?;
        }

        if db.granularity == 0 {
            Err(ExchangeRatesDbError::InvalidGranularity)
        } else {
            // Patch the detected granularity to make lower-bound searches exclusive
            db.granularity -= 1;

            Ok(db)
        }
    }

    pub fn get(
        &self,
        platform: &str,
        asset: &AssetSymbol,
        datetime: DateTime<Utc>,
        reference: &AssetSymbol,
    ) -> Result<Decimal, ExchangeRateError> {
        let end = datetime.timestamp();
        let start = end - self.granularity;
        let pair = (asset.clone(), reference.clone());
        let not_found = || ExchangeRateError::NotFound(asset.clone(), reference.clone(), datetime);

        let platform_rate = self
            .by_platform
            .get(&(platform.to_lowercase(), pair.clone()))
            .and_then(|map| lookup(map, start, end));

        platform_rate
            .or_else(|| self.generic.get(&pair).and_then(|map| lookup(map, start, end)))
            .ok_or_else(not_found)
    }
}

impl PriceOracle for ExchangeRates {
    fn price(
        &self,
        platform: &str,
        asset: &AssetSymbol,
        time: DateTime<Utc>,
        reference: &AssetSymbol,
    ) -> Result<Decimal, ExchangeRateError> {
        if asset == reference {
            return Ok(Decimal::ONE);
        }

        self.get(platform, asset, time, reference)
    }
}

fn lookup(map: &ExchangeRateMap, start: i64, end: i64) -> Option<Decimal> {
    map.range(start..=end).next_back().map(|(_k, v)| *v)
}

fn read_ron(path: &Path) -> Result<ExchangeRateMap, ExchangeRatesDbError> {
    let data = fs::read_to_string(path)?;
    let rates = ron::from_str::<ExchangeRateMap>(&data)
        .map_err(|err| ExchangeRatesDbError::Parse(path.to_path_buf(), err))?;

    Ok(rates)
}

fn check_granularity(map: &ExchangeRateMap, granularity: i64) -> Result<i64, ExchangeRatesDbError> {
    map.keys()
        .try_fold((None, granularity), |(prev, granularity), timestamp| match prev {
            None => Some((Some(*timestamp), granularity)),
            Some(prev) if timestamp - prev == granularity => Some((Some(*timestamp), granularity)),
            Some(prev) if granularity == 0 => Some((Some(*timestamp), timestamp - prev)),
            Some(_) => None,
        })
        .map(|(_, granularity)| granularity)
        .ok_or(ExchangeRatesDbError::InvalidGranularity)
}

#[cfg(test)]
impl ExchangeRates {
    pub(crate) fn from_raw(
        granularity: i64,
        generic: impl IntoIterator<Item = ((&'static str, &'static str), ExchangeRateMap)>,
    ) -> Self {
        Self {
            granularity,
            generic: generic
                .into_iter()
                .map(|((asset, reference), map)| {
                    ((AssetSymbol::new(asset), AssetSymbol::new(reference)), map)
                })
                .collect(),
            by_platform: HashMap::new(),
        }
    }

    /// Daily rates against `reference`, one `(asset, "YYYY-MM-DD", price)` entry per day.
    pub(crate) fn daily(reference: &str, entries: &[(&str, &str, &str)]) -> Self {
        let mut generic: HashMap<Pair, ExchangeRateMap> = HashMap::new();
        for (asset, date, price) in entries {
            let timestamp = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp();
            generic
                .entry((AssetSymbol::new(asset), AssetSymbol::new(reference)))
                .or_default()
                .insert(timestamp, price.parse().unwrap());
        }

        Self {
            granularity: 60 * 60 * 24 - 1,
            generic,
            by_platform: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::operation::OperationKind;

    const ONE_DAY: i64 = 60 * 60 * 24 - 1;

    fn btc_eur() -> ExchangeRates {
        let mut btc = ExchangeRateMap::new();
        btc.insert(1640995200, Decimal::new(4100000, 2)); // 2022-01-01
        btc.insert(1641081600, Decimal::new(4200000, 2)); // 2022-01-02
        btc.insert(1641168000, Decimal::new(4050000, 2)); // 2022-01-03

        ExchangeRates::from_raw(ONE_DAY, [(("BTC", "EUR"), btc)])
    }

    #[test]
    fn test_exchange_rates() {
        let exchange_rates = btc_eur();
        let btc = AssetSymbol::new("BTC");
        let eur = AssetSymbol::new("EUR");

        let datetime = "2022-01-01 13:42:00+0000".parse().unwrap();
        let actual = exchange_rates.get("kraken", &btc, datetime, &eur);
        assert_eq!(actual, Ok(Decimal::new(4100000, 2)));

        let datetime = "2022-01-02 23:59:59+0000".parse().unwrap();
        let actual = exchange_rates.get("kraken", &btc, datetime, &eur);
        assert_eq!(actual, Ok(Decimal::new(4200000, 2)));

        let datetime = "2022-01-03 00:00:00+0000".parse().unwrap();
        let actual = exchange_rates.get("kraken", &btc, datetime, &eur);
        assert_eq!(actual, Ok(Decimal::new(4050000, 2)));

        // Bounds checks; out of bounds
        let datetime = "2021-12-31 23:59:59+0000".parse().unwrap();
        let actual = exchange_rates.get("kraken", &btc, datetime, &eur);
        let expected = Err(ExchangeRateError::NotFound(btc.clone(), eur.clone(), datetime));
        assert_eq!(actual, expected);

        let datetime = "2022-01-04 00:00:00+0000".parse().unwrap();
        let actual = exchange_rates.get("kraken", &btc, datetime, &eur);
        let expected = Err(ExchangeRateError::NotFound(btc.clone(), eur.clone(), datetime));
        assert_eq!(actual, expected);

        // Unknown pair
        let eth = AssetSymbol::new("ETH");
        let actual = exchange_rates.get("kraken", &eth, datetime, &eur);
        assert_eq!(actual, Err(ExchangeRateError::NotFound(eth, eur, datetime)));
    }

    #[test]
    fn test_cost_of_operations() {
        let exchange_rates = btc_eur();
        let eur = AssetSymbol::new("EUR");
        let time = "2022-01-02 10:00:00+0000".parse().unwrap();
        let amount = "0.5".parse().unwrap();

        let buy = Operation::new(time, "kraken", amount, "BTC".into(), OperationKind::Buy).unwrap();
        let cost = exchange_rates.cost(&buy, &eur).unwrap();
        assert_eq!(cost, FiatAmount::from(Decimal::new(21000, 0)));

        let partial = exchange_rates
            .partial_cost(&buy, "0.1".parse().unwrap(), &eur)
            .unwrap();
        assert_eq!(partial, FiatAmount::from(Decimal::new(4200, 0)));

        // Fiat priced in itself needs no DB entry.
        let deposit =
            Operation::new(time, "kraken", amount, "EUR".into(), OperationKind::Deposit).unwrap();
        let cost = exchange_rates.cost(&deposit, &eur).unwrap();
        assert_eq!(cost, FiatAmount::from(Decimal::new(5, 1)));
    }

    #[test]
    fn test_load_directory() {
        let dir = std::env::temp_dir().join(format!("lotcount-rates-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("btc-eur.ron"),
            r#"{ 1640995200: "41000", 1641081600: "42000" }"#,
        )
        .unwrap();
        fs::write(
            dir.join("binance-btc-eur.ron"),
            r#"{ 1640995200: "41100", 1641081600: "42100" }"#,
        )
        .unwrap();
        fs::write(
            dir.join("coinbase-pro-btc-eur.ron"),
            r#"{ 1640995200: "40900", 1641081600: "41900" }"#,
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let exchange_rates = ExchangeRates::new(&dir).unwrap();
        assert_eq!(exchange_rates.granularity, ONE_DAY);

        let btc = AssetSymbol::new("BTC");
        let eur = AssetSymbol::new("EUR");
        let datetime = "2022-01-01 12:00:00+0000".parse().unwrap();
        assert_eq!(
            exchange_rates.price("Binance", &btc, datetime, &eur),
            Ok(Decimal::new(41100, 0))
        );
        assert_eq!(
            exchange_rates.price("kraken", &btc, datetime, &eur),
            Ok(Decimal::new(41000, 0))
        );
        assert_eq!(
            exchange_rates.price("Coinbase-Pro", &btc, datetime, &eur),
            Ok(Decimal::new(40900, 0))
        );

        fs::write(
            dir.join("eth-eur.ron"),
            r#"{ 1640995200: "3000", 1641000000: "3100" }"#,
        )
        .unwrap();
        assert!(matches!(
            ExchangeRates::new(&dir),
            Err(ExchangeRatesDbError::InvalidGranularity)
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
