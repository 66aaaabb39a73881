use crate::model::{AssetSymbol, Operation};
use chrono::{DateTime, Datelike as _, Months, NaiveDate, Utc};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Staking interest received in fiat currency {0}; staking rewards must be a crypto-asset")]
    StakingInterestOnFiat(AssetSymbol),

    #[error("Unable to evaluate taxation for country `{0}`")]
    UnknownCountry(String),

    #[error("Unknown accounting principle `{0}`, expected `fifo` or `lifo`")]
    UnknownPrinciple(String),

    #[error("Invalid tax year `{0}`")]
    InvalidTaxYear(String),
}

/// Countries with a known taxation rule set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Country {
    Germany,
}

/// Which acquisition lot a disposal consumes first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Principle {
    /// Oldest lot first.
    Fifo,
    /// Newest lot first.
    Lifo,
}

/// Everything jurisdiction-dependent the taxation pass needs to know. Fixed for a run.
#[derive(Clone, Debug)]
pub struct Jurisdiction {
    pub country: Country,
    pub principle: Principle,
    pub fiat: AssetSymbol,
    pub tax_year: i32,

    /// Disposals later than this many months after acquisition are long-term.
    pub holding_period: Months,
}

impl FromStr for Country {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "germany" | "de" => Ok(Self::Germany),
            _ => Err(ConfigurationError::UnknownCountry(s.to_string())),
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Germany => "Germany",
        })
    }
}

impl FromStr for Principle {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            _ => Err(ConfigurationError::UnknownPrinciple(s.to_string())),
        }
    }
}

impl fmt::Display for Principle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fifo => "FIFO",
            Self::Lifo => "LIFO",
        })
    }
}

impl Jurisdiction {
    /// The rule set of `country` for `tax_year`.
    pub fn new(country: Country, tax_year: i32) -> Self {
        match country {
            Country::Germany => Self {
                country,
                principle: Principle::Fifo,
                fiat: AssetSymbol::new("EUR"),
                tax_year,
                holding_period: Months::new(12),
            },
        }
    }

    pub fn with_principle(mut self, principle: Principle) -> Self {
        self.principle = principle;
        self
    }

    /// True when a disposal at `disposed` of units acquired at `acquired` is past the exemption
    /// threshold.
    pub fn is_long_term(&self, acquired: DateTime<Utc>, disposed: DateTime<Utc>) -> bool {
        match acquired.checked_add_months(self.holding_period) {
            Some(threshold) => disposed > threshold,
            None => false,
        }
    }

    /// True when disposing at `disposed` of units from `acquisition` realizes a taxable gain.
    ///
    /// Income-like origins stay taxable no matter how long they were held, unless the asset is
    /// fiat.
    pub fn is_taxable_disposal(&self, acquisition: &Operation, disposed: DateTime<Utc>) -> bool {
        let keeps_income_origin =
            acquisition.kind().is_income_origin() && !acquisition.asset().is_fiat();

        keeps_income_origin || !self.is_long_term(acquisition.time(), disposed)
    }

    pub fn in_tax_period(&self, time: DateTime<Utc>) -> bool {
        time.year() == self.tax_year
    }

    /// The instant at which unrealized holdings are valued: the end of the tax year, or now if
    /// the year is still running.
    pub fn deadline(&self) -> DateTime<Utc> {
        let end_of_year = NaiveDate::from_ymd_opt(self.tax_year, 12, 31)
            .and_then(|date| date.and_hms_opt(23, 59, 59))
            .map(|naive| naive.and_utc());

        match end_of_year {
            Some(end_of_year) => end_of_year.min(Utc::now()),
            None => Utc::now(),
        }
    }
}

/// Parse a tax year argument.
pub fn parse_tax_year(s: &str) -> Result<i32, ConfigurationError> {
    s.trim()
        .parse::<i32>()
        .ok()
        .filter(|year| (1970..=9999).contains(year))
        .ok_or_else(|| ConfigurationError::InvalidTaxYear(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_germany_defaults() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        assert_eq!(jurisdiction.principle, Principle::Fifo);
        assert_eq!(jurisdiction.fiat, AssetSymbol::new("EUR"));

        let jurisdiction = jurisdiction.with_principle(Principle::Lifo);
        assert_eq!(jurisdiction.principle, Principle::Lifo);
    }

    #[test]
    fn test_taxable_disposal() {
        use crate::model::OperationKind;

        let jurisdiction = Jurisdiction::new(Country::Germany, 2021);
        let acquisition = |kind, asset: &str| {
            let amount = "1".parse().unwrap();
            Operation::new(utc("2020-01-01 00:00:00+0000"), "kraken", amount, asset.into(), kind)
                .unwrap()
        };
        let short = utc("2020-06-01 00:00:00+0000");
        let long = utc("2021-06-01 00:00:00+0000");

        let buy = acquisition(OperationKind::Buy, "BTC");
        assert!(jurisdiction.is_taxable_disposal(&buy, short));
        assert!(!jurisdiction.is_taxable_disposal(&buy, long));

        let interest = acquisition(OperationKind::CoinLendInterest, "BTC");
        assert!(jurisdiction.is_taxable_disposal(&interest, long));

        let fiat_interest = acquisition(OperationKind::CoinLendInterest, "USD");
        assert!(jurisdiction.is_taxable_disposal(&fiat_interest, short));
        assert!(!jurisdiction.is_taxable_disposal(&fiat_interest, long));
    }

    #[test]
    fn test_long_term() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2021);
        let bought = utc("2020-01-01 00:00:00+0000");

        assert!(jurisdiction.is_long_term(bought, utc("2021-06-01 00:00:00+0000")));
        assert!(!jurisdiction.is_long_term(bought, utc("2020-06-01 00:00:00+0000")));

        // Exactly one year is still short-term.
        assert!(!jurisdiction.is_long_term(bought, utc("2021-01-01 00:00:00+0000")));
        assert!(jurisdiction.is_long_term(bought, utc("2021-01-01 00:00:01+0000")));
    }

    #[test]
    fn test_tax_period_and_deadline() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        assert!(jurisdiction.in_tax_period(utc("2020-12-31 23:59:59+0000")));
        assert!(!jurisdiction.in_tax_period(utc("2021-01-01 00:00:00+0000")));
        assert_eq!(jurisdiction.deadline(), utc("2020-12-31 23:59:59+0000"));
    }

    #[test]
    fn test_parse_configuration() {
        assert_eq!("Germany".parse::<Country>().unwrap(), Country::Germany);
        assert!(matches!(
            "atlantis".parse::<Country>(),
            Err(ConfigurationError::UnknownCountry(_))
        ));
        assert_eq!("LIFO".parse::<Principle>().unwrap(), Principle::Lifo);
        assert!(matches!(
            "hifo".parse::<Principle>(),
            Err(ConfigurationError::UnknownPrinciple(_))
        ));
        assert_eq!(parse_tax_year("2021").unwrap(), 2021);
        assert!(parse_tax_year("twenty").is_err());
    }
}
