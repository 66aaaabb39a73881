use crate::model::{amount::Quantity, constants::FIAT_SYMBOLS};
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// Malformed operation; rejected at construction.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Operation amount must be positive, found {0}")]
    NonPositiveAmount(Quantity),

    #[error("Operation has an empty asset symbol")]
    EmptyAsset,

    #[error("Operation has an empty platform identifier")]
    EmptyPlatform,
}

/// An operation kind with no taxation rule.
#[cfg_attr(test, derive(Eq, PartialEq))]
#[derive(Debug, Error)]
#[error("Unsupported operation kind `{0}`")]
pub struct UnsupportedOperationError(pub String);

/// Asset ticker symbol, normalized to upper case.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AssetSymbol(Arc<str>);

/// The closed set of ledger event kinds.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum OperationKind {
    Buy,
    Sell,
    Fee,
    Deposit,
    Withdraw,
    CoinLend,
    CoinLendEnd,
    CoinLendInterest,
    StakingInterest,
    Airdrop,
    Commission,
}

/// Where an operation was read from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Source {
    pub file: Arc<str>,
    pub line: u64,
}

/// One immutable ledger event for a single asset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operation {
    time: DateTime<Utc>,
    platform: Arc<str>,
    amount: Quantity,
    asset: AssetSymbol,
    kind: OperationKind,
    source: Option<Source>,
    remark: Option<String>,
}

impl AssetSymbol {
    pub fn new(symbol: &str) -> Self {
        Self(Arc::from(symbol.trim().to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for ISO 4217 currencies.
    pub fn is_fiat(&self) -> bool {
        FIAT_SYMBOLS.contains(&self.as_str())
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetSymbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl OperationKind {
    /// Kinds that stay taxable on disposal regardless of holding period, unless the asset is fiat.
    pub fn is_income_origin(self) -> bool {
        matches!(
            self,
            Self::Airdrop | Self::CoinLendInterest | Self::StakingInterest | Self::Commission
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
            Self::Fee => "Fee",
            Self::Deposit => "Deposit",
            Self::Withdraw => "Withdraw",
            Self::CoinLend => "CoinLend",
            Self::CoinLendEnd => "CoinLendEnd",
            Self::CoinLendInterest => "CoinLendInterest",
            Self::StakingInterest => "StakingInterest",
            Self::Airdrop => "Airdrop",
            Self::Commission => "Commission",
        })
    }
}

impl FromStr for OperationKind {
    type Err = UnsupportedOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "fee" => Ok(Self::Fee),
            "deposit" => Ok(Self::Deposit),
            "withdraw" | "withdrawal" => Ok(Self::Withdraw),
            "coinlend" => Ok(Self::CoinLend),
            "coinlendend" => Ok(Self::CoinLendEnd),
            "coinlendinterest" => Ok(Self::CoinLendInterest),
            "stakinginterest" => Ok(Self::StakingInterest),
            "airdrop" => Ok(Self::Airdrop),
            "commission" => Ok(Self::Commission),
            _ => Err(UnsupportedOperationError(s.to_string())),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl Operation {
    pub fn new(
        time: DateTime<Utc>,
        platform: &str,
        amount: Quantity,
        asset: AssetSymbol,
        kind: OperationKind,
    ) -> Result<Self, ValidationError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount));
        }
        if asset.as_str().is_empty() {
            return Err(ValidationError::EmptyAsset);
        }
        let platform = platform.trim();
        if platform.is_empty() {
            return Err(ValidationError::EmptyPlatform);
        }

        Ok(Self {
            time,
            platform: Arc::from(platform),
            amount,
            asset,
            kind,
            source: None,
            remark: None,
        })
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        let remark = remark.into();
        self.remark = (!remark.is_empty()).then_some(remark);
        self
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn amount(&self) -> Quantity {
        self.amount
    }

    pub fn asset(&self) -> &AssetSymbol {
        &self.asset
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    /// Human-readable location for error messages.
    pub fn describe_location(&self) -> String {
        let mut location = format!("{} on {}", self.time.format("%F %T %Z"), self.platform);
        if let Some(source) = &self.source {
            location.push_str(&format!(" ({source})"));
        }

        location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> DateTime<Utc> {
        "2021-03-04 05:06:07+0000".parse().unwrap()
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let zero = Quantity::default();
        let err = Operation::new(time(), "kraken", zero, "BTC".into(), OperationKind::Buy);
        assert_eq!(err.unwrap_err(), ValidationError::NonPositiveAmount(zero));

        let negative: Quantity = "-1".parse().unwrap();
        let err = Operation::new(time(), "kraken", negative, "BTC".into(), OperationKind::Buy);
        assert_eq!(err.unwrap_err(), ValidationError::NonPositiveAmount(negative));
    }

    #[test]
    fn test_rejects_empty_fields() {
        let one: Quantity = "1".parse().unwrap();
        let err = Operation::new(time(), "kraken", one, " ".into(), OperationKind::Buy);
        assert_eq!(err.unwrap_err(), ValidationError::EmptyAsset);

        let err = Operation::new(time(), "", one, "ETH".into(), OperationKind::Buy);
        assert_eq!(err.unwrap_err(), ValidationError::EmptyPlatform);
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Buy".parse(), Ok(OperationKind::Buy));
        assert_eq!("coin_lend_interest".parse(), Ok(OperationKind::CoinLendInterest));
        assert_eq!("StakingInterest".parse(), Ok(OperationKind::StakingInterest));
        assert_eq!("withdrawal".parse(), Ok(OperationKind::Withdraw));
        assert_eq!(
            "MarginFee".parse::<OperationKind>(),
            Err(UnsupportedOperationError("MarginFee".to_string()))
        );
    }

    #[test]
    fn test_asset_symbol() {
        let eur = AssetSymbol::new(" eur ");
        assert_eq!(eur.as_str(), "EUR");
        assert!(eur.is_fiat());
        assert!(!AssetSymbol::new("btc").is_fiat());
    }

    #[test]
    fn test_describe_location() {
        let one: Quantity = "1".parse().unwrap();
        let op = Operation::new(time(), "binance", one, "BTC".into(), OperationKind::Sell)
            .unwrap()
            .with_source(Source {
                file: Arc::from("ledger.csv"),
                line: 12,
            });

        assert_eq!(
            op.describe_location(),
            "2021-03-04 05:06:07 UTC on binance (ledger.csv:12)"
        );
    }
}
