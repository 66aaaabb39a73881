use crate::basis::policy::{ConfigurationError, Jurisdiction};
use crate::basis::queue::{BalanceQueue, Lot, QueueError};
use crate::model::{AssetSymbol, ExchangeRateError, FiatAmount, Operation, OperationKind};
use crate::model::{PriceOracle, Quantity, Source, TaxCategory, TaxEvent};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// Fatal errors; each aborts the pass of the asset it occurred in.
#[derive(Debug, Error)]
pub enum TaxError {
    #[error(
        "Not enough {asset} to sell: missing {missing} {asset} (sale at {} on {platform}{}). \
         Every account statement, including those of previous years, and every deposit of \
         {asset} is required to evaluate taxation",
        .time.format("%F %T %Z"),
        fmt_origin(.origin)
    )]
    DataIntegrity {
        asset: AssetSymbol,
        missing: Quantity,
        time: DateTime<Utc>,
        platform: String,
        origin: Option<Source>,
    },

    #[error("Configuration error")]
    Configuration(#[from] ConfigurationError),

    #[error("Unable to value operation")]
    ExchangeRate(#[from] ExchangeRateError),

    #[error("Balance queue error")]
    Queue(#[from] QueueError),

    #[error("{found} operation at {location} given to the {expected} taxation pass")]
    ForeignAsset {
        expected: AssetSymbol,
        found: AssetSymbol,
        location: String,
    },
}

fn fmt_origin(origin: &Option<Source>) -> String {
    origin
        .as_ref()
        .map(|source| format!(", see {source}"))
        .unwrap_or_default()
}

/// Fees that were never matched with an acquisition. Reported, never fatal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResidualFeeWarning {
    pub asset: AssetSymbol,
    pub amount: Quantity,
}

impl fmt::Display for ResidualFeeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unresolved fee of {amount} {asset}: not enough {asset} was ever held to pay it. \
             An account statement may be missing",
            amount = self.amount,
            asset = self.asset,
        )
    }
}

/// Result of one asset's taxation pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetEvaluation {
    pub asset: AssetSymbol,

    /// Tax events, ordered by time of the triggering operation.
    pub tax_events: Vec<TaxEvent>,

    /// Unrealized holdings: the lots left in the queue at the end of the pass.
    pub holdings: Vec<Lot>,

    pub warnings: Vec<ResidualFeeWarning>,
}

/// Taxation state machine for a single asset.
///
/// Operations must be fed in ascending time order; no reordering happens here.
pub struct Taxman<'a, P: PriceOracle + ?Sized> {
    jurisdiction: &'a Jurisdiction,
    oracle: &'a P,
    queue: BalanceQueue,
    tax_events: Vec<TaxEvent>,
}

impl<'a, P: PriceOracle + ?Sized> Taxman<'a, P> {
    pub fn new(asset: AssetSymbol, jurisdiction: &'a Jurisdiction, oracle: &'a P) -> Self {
        Self {
            jurisdiction,
            oracle,
            queue: BalanceQueue::new(asset, jurisdiction.principle),
            tax_events: Vec::new(),
        }
    }

    pub fn asset(&self) -> &AssetSymbol {
        self.queue.asset()
    }

    pub fn queue(&self) -> &BalanceQueue {
        &self.queue
    }

    /// Apply one operation.
    pub fn process(&mut self, op: Operation) -> Result<(), TaxError> {
        if op.asset() != self.asset() {
            return Err(TaxError::ForeignAsset {
                expected: self.asset().clone(),
                found: op.asset().clone(),
                location: op.describe_location(),
            });
        }

        debug!(
            "{kind} {amount} {asset} at {location}",
            kind = op.kind(),
            amount = op.amount(),
            asset = op.asset(),
            location = op.describe_location(),
        );

        let in_tax_period = self.jurisdiction.in_tax_period(op.time());

        match op.kind() {
            OperationKind::Fee => {
                self.queue.remove_fee(op.amount())?;

                if in_tax_period {
                    let cost = self.cost(&op)?;
                    self.emit(TaxEvent::new(TaxCategory::Miscellaneous, -cost, &op));
                }
            }

            // Units move or get locked, but stay ours.
            OperationKind::CoinLend
            | OperationKind::CoinLendEnd
            | OperationKind::Deposit
            | OperationKind::Withdraw => (),

            OperationKind::Buy => self.queue.put(op)?,

            OperationKind::CoinLendInterest | OperationKind::StakingInterest => {
                let is_fiat = op.asset().is_fiat();
                if is_fiat && op.kind() == OperationKind::StakingInterest {
                    return Err(ConfigurationError::StakingInterestOnFiat(op.asset().clone()).into());
                }

                if in_tax_period {
                    let category = if is_fiat {
                        TaxCategory::CapitalIncome
                    } else {
                        TaxCategory::OtherIncome
                    };
                    let cost = self.cost(&op)?;
                    self.emit(TaxEvent::new(category, cost, &op));
                }
                self.queue.put(op)?;
            }

            // Taxed when the airdropped units are disposed of.
            OperationKind::Airdrop => self.queue.put(op)?,

            OperationKind::Commission => {
                if in_tax_period {
                    let cost = self.cost(&op)?;
                    self.emit(TaxEvent::new(TaxCategory::OtherIncome, cost, &op));
                }
                self.queue.put(op)?;
            }

            OperationKind::Sell => self.sell(op, in_tax_period)?,
        }

        Ok(())
    }

    fn sell(&mut self, op: Operation, in_tax_period: bool) -> Result<(), TaxError> {
        let consumed = self.queue.consume(op.amount())?;
        let is_reporting_fiat = op.asset() == &self.jurisdiction.fiat;

        if let Some(missing) = consumed.shortfall {
            if !is_reporting_fiat {
                return Err(TaxError::DataIntegrity {
                    asset: op.asset().clone(),
                    missing,
                    time: op.time(),
                    platform: op.platform().to_string(),
                    origin: op.source().cloned(),
                });
            }

            warn!(
                "Not enough {asset} to sell: missing {missing} {asset} at {location}. \
                 {asset} holdings are not taxed, but the reported holdings will be wrong",
                asset = op.asset(),
                location = op.describe_location(),
            );
        }

        if is_reporting_fiat || !in_tax_period {
            return Ok(());
        }

        let proceeds = self.cost(&op)?;
        let mut taxed_gain = FiatAmount::default();
        let mut attribution = Vec::new();

        for portion in &consumed.portions {
            let acquisition = &portion.operation;

            if !self.jurisdiction.is_taxable_disposal(acquisition, op.time()) {
                continue;
            }

            let sell_value = proceeds.scale(portion.amount.ratio_of(op.amount()));
            let buy_cost =
                self.oracle
                    .partial_cost(acquisition, portion.amount, &self.jurisdiction.fiat)?;
            taxed_gain += sell_value - buy_cost;

            attribution.push(format!(
                "{amount} {asset} from {kind} at {time}",
                amount = portion.amount,
                asset = acquisition.asset(),
                kind = acquisition.kind(),
                time = acquisition.time().format("%F %T %Z"),
            ));
        }

        if attribution.is_empty() {
            debug!("Sale at {} is tax-exempt", op.describe_location());
            return Ok(());
        }

        let mut remark = attribution.join("; ");
        if let Some(user_remark) = op.remark() {
            remark = format!("{user_remark}; {remark}");
        }
        self.emit(TaxEvent::new(TaxCategory::PrivateSale, taxed_gain, &op).with_remark(remark));

        Ok(())
    }

    fn cost(&self, op: &Operation) -> Result<FiatAmount, ExchangeRateError> {
        self.oracle.cost(op, &self.jurisdiction.fiat)
    }

    fn emit(&mut self, event: TaxEvent) {
        debug!(
            "Tax event: {category}, {gain} {fiat}",
            category = event.category,
            gain = event.taxed_gain,
            fiat = self.jurisdiction.fiat,
        );
        self.tax_events.push(event);
    }

    /// End the pass, surfacing fees that never found an acquisition.
    pub fn finish(self) -> AssetEvaluation {
        let asset = self.queue.asset().clone();
        let mut warnings = Vec::new();

        let pending = self.queue.pending_fee();
        if pending.is_positive() {
            let warning = ResidualFeeWarning {
                asset: asset.clone(),
                amount: pending,
            };
            warn!("{warning}");
            warnings.push(warning);
        }

        AssetEvaluation {
            asset,
            tax_events: self.tax_events,
            holdings: self.queue.into_lots(),
            warnings,
        }
    }
}

/// Run the taxation pass over one asset's time-ordered operations.
pub fn evaluate_asset<P, I>(
    asset: AssetSymbol,
    operations: I,
    jurisdiction: &Jurisdiction,
    oracle: &P,
) -> Result<AssetEvaluation, TaxError>
where
    P: PriceOracle + ?Sized,
    I: IntoIterator<Item = Operation>,
{
    let mut taxman = Taxman::new(asset, jurisdiction, oracle);
    for op in operations {
        taxman.process(op)?;
    }

    Ok(taxman.finish())
}
