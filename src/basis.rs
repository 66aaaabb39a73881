pub use self::policy::{parse_tax_year, ConfigurationError, Country, Jurisdiction, Principle};
pub use self::queue::{BalanceQueue, Consumed, Lot, QueueError, SoldPortion};
pub use self::taxman::{evaluate_asset, AssetEvaluation, ResidualFeeWarning, TaxError, Taxman};
use crate::model::{AssetSymbol, Operation, PriceOracle, TaxEvent};
use error_iter::ErrorIter as _;
use rayon::prelude::*;
use std::{collections::BTreeMap, fmt::Display};
use thiserror::Error;
use tracing::debug;

mod policy;
mod queue;
mod taxman;

#[derive(Debug, Error)]
pub enum CheckListError {
    #[error("Did not pass CheckList: {0} asset(s) could not be evaluated")]
    Failed(usize),
}

/// Outcome of the taxation pass over all assets, in ascending asset order.
///
/// A failure aborts only the asset it occurred in.
#[derive(Debug)]
pub struct Evaluation {
    pub assets: Vec<(AssetSymbol, Result<AssetEvaluation, TaxError>)>,
}

/// Group operations by asset and evaluate each group on the rayon pool.
///
/// Within a group, operations are stably sorted by time, then platform. Operations sharing both
/// keep their input order.
pub fn evaluate<P>(
    operations: impl IntoIterator<Item = Operation>,
    jurisdiction: &Jurisdiction,
    oracle: &P,
) -> Evaluation
where
    P: PriceOracle + ?Sized,
{
    let mut groups: BTreeMap<AssetSymbol, Vec<Operation>> = BTreeMap::new();
    for op in operations {
        groups.entry(op.asset().clone()).or_default().push(op);
    }

    let groups: Vec<_> = groups.into_iter().collect();
    debug!("Evaluating {} asset(s)", groups.len());

    let assets = groups
        .into_par_iter()
        .map(|(asset, mut ops)| {
            ops.sort_by(|a, b| {
                a.time()
                    .cmp(&b.time())
                    .then_with(|| a.platform().cmp(b.platform()))
            });
            let result = evaluate_asset(asset.clone(), ops, jurisdiction, oracle);

            (asset, result)
        })
        .collect();

    Evaluation { assets }
}

impl Evaluation {
    pub fn is_passing(&self) -> bool {
        self.assets.iter().all(|(_, result)| result.is_ok())
    }

    pub fn successes(&self) -> impl Iterator<Item = &AssetEvaluation> {
        self.assets.iter().filter_map(|(_, result)| result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&AssetSymbol, &TaxError)> {
        self.assets
            .iter()
            .filter_map(|(asset, result)| result.as_ref().err().map(|err| (asset, err)))
    }
}

/// Merge the tax events of all assets, ordered by time of the triggering operation.
pub fn merge_tax_events<'a>(
    evaluations: impl IntoIterator<Item = &'a AssetEvaluation>,
) -> Vec<&'a TaxEvent> {
    let mut events: Vec<_> = evaluations
        .into_iter()
        .flat_map(|evaluation| &evaluation.tax_events)
        .collect();
    events.sort_by_key(|event| event.operation.time());

    events
}

/// The checklist is an intermediate type (as in a typestate) between the taxation pass and
/// reporting. Only a fully successful [`Evaluation`] makes it through.
pub struct CheckList {
    evaluations: Vec<AssetEvaluation>,
    errors: Vec<(AssetSymbol, TaxError)>,
}

impl Display for CheckList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Taxation CheckList")?;
        writeln!(f, "======== =========")?;
        writeln!(f)?;

        for evaluation in &self.evaluations {
            writeln!(
                f,
                "✔ {}: {} tax event(s), {} lot(s) held",
                evaluation.asset,
                evaluation.tax_events.len(),
                evaluation.holdings.len(),
            )?;
            for warning in &evaluation.warnings {
                writeln!(f, "   ⚠ {warning}")?;
            }
        }

        if self.is_passing() {
            writeln!(f)?;
            writeln!(f, "No issues detected! 🎉")?;
        } else {
            for (asset, err) in &self.errors {
                writeln!(f, "❌ {asset}: {err}")?;
                for source in err.sources().skip(1) {
                    writeln!(f, "     Caused by {source}")?;
                }
            }
        }

        Ok(())
    }
}

impl CheckList {
    /// Consume the evaluation and execute the checklist, separating errors from results.
    ///
    /// Prints the checklist and returns the per-asset results if no asset failed.
    pub fn execute(evaluation: Evaluation) -> Result<Vec<AssetEvaluation>, CheckListError> {
        let checklist = Self::new(evaluation);
        println!("{checklist}");

        checklist.into_result()
    }

    fn new(evaluation: Evaluation) -> Self {
        let mut evaluations = Vec::new();
        let mut errors = Vec::new();
        for (asset, result) in evaluation.assets {
            match result {
                Ok(evaluation) => evaluations.push(evaluation),
                Err(err) => errors.push((asset, err)),
            }
        }

        Self {
            evaluations,
            errors,
        }
    }

    fn into_result(self) -> Result<Vec<AssetEvaluation>, CheckListError> {
        if self.is_passing() {
            Ok(self.evaluations)
        } else {
            Err(CheckListError::Failed(self.errors.len()))
        }
    }

    fn is_passing(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExchangeRates, FiatAmount, OperationKind, TaxCategory};
    use similar_asserts::assert_eq;

    fn op(time: &str, platform: &str, kind: OperationKind, amount: &str, asset: &str) -> Operation {
        Operation::new(
            time.parse().unwrap(),
            platform,
            amount.parse().unwrap(),
            asset.into(),
            kind,
        )
        .unwrap()
    }

    fn rates() -> ExchangeRates {
        ExchangeRates::daily(
            "EUR",
            &[
                ("BTC", "2020-01-01", "100"),
                ("BTC", "2020-06-01", "300"),
                ("ETH", "2020-01-01", "10"),
                ("ETH", "2020-06-01", "20"),
            ],
        )
    }

    fn ledger() -> Vec<Operation> {
        vec![
            op("2020-06-01 10:00:00+0000", "kraken", OperationKind::Sell, "1", "ETH"),
            op("2020-06-01 10:00:00+0000", "kraken", OperationKind::Sell, "0.5", "BTC"),
            op("2020-01-01 10:00:00+0000", "kraken", OperationKind::Buy, "1", "BTC"),
            op("2020-01-01 10:00:00+0000", "kraken", OperationKind::Buy, "4", "ETH"),
            op("2020-01-01 11:00:00+0000", "binance", OperationKind::Buy, "1", "BTC"),
        ]
    }

    #[test]
    fn test_evaluate_groups_and_sorts() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        let evaluation = evaluate(ledger(), &jurisdiction, &rates());
        assert!(evaluation.is_passing());

        let assets: Vec<_> = evaluation.assets.iter().map(|(asset, _)| asset.as_str()).collect();
        assert_eq!(assets, vec!["BTC", "ETH"]);

        let btc = evaluation.successes().next().unwrap();
        assert_eq!(btc.tax_events.len(), 1);
        assert_eq!(btc.tax_events[0].category, TaxCategory::PrivateSale);
        assert_eq!(btc.tax_events[0].taxed_gain, "100".parse::<FiatAmount>().unwrap());
        assert_eq!(btc.holdings.len(), 2);

        let merged = merge_tax_events(evaluation.successes());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_platform_breaks_time_ties() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        let ops = vec![
            op("2020-01-01 10:00:00+0000", "kraken", OperationKind::Buy, "2", "BTC"),
            op("2020-01-01 10:00:00+0000", "binance", OperationKind::Buy, "1", "BTC"),
        ];

        let evaluation = evaluate(ops, &jurisdiction, &rates());
        let btc = evaluation.successes().next().unwrap();
        let platforms: Vec<_> = btc
            .holdings
            .iter()
            .map(|lot| lot.operation().platform())
            .collect();
        assert_eq!(platforms, vec!["binance", "kraken"]);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        let oracle = rates();

        let first = evaluate(ledger(), &jurisdiction, &oracle);
        let second = evaluate(ledger(), &jurisdiction, &oracle);
        let first: Vec<_> = first.successes().cloned().collect();
        let second: Vec<_> = second.successes().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_failure_is_isolated_to_asset() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        let mut ops = ledger();
        ops.push(op("2020-06-01 10:00:00+0000", "kraken", OperationKind::Sell, "9", "XRP"));

        let evaluation = evaluate(ops, &jurisdiction, &rates());
        assert!(!evaluation.is_passing());
        assert_eq!(evaluation.successes().count(), 2);

        let failures: Vec<_> = evaluation.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0.as_str(), "XRP");
        assert!(matches!(failures[0].1, TaxError::DataIntegrity { .. }));

        let checklist = CheckList::new(evaluation);
        let output = checklist.to_string();
        assert!(output.contains("✔ BTC"));
        assert!(output.contains("❌ XRP: Not enough XRP to sell"));
        assert!(matches!(
            checklist.into_result(),
            Err(CheckListError::Failed(1))
        ));
    }

    #[test]
    fn test_checklist_passes() {
        let jurisdiction = Jurisdiction::new(Country::Germany, 2020);
        let ops = vec![
            op("2020-01-01 10:00:00+0000", "kraken", OperationKind::Buy, "1", "BTC"),
            op("2020-01-02 10:00:00+0000", "kraken", OperationKind::Fee, "2", "BTC"),
        ];
        let oracle = ExchangeRates::daily(
            "EUR",
            &[("BTC", "2020-01-01", "100"), ("BTC", "2020-01-02", "100")],
        );
        let evaluation = evaluate(ops, &jurisdiction, &oracle);

        let checklist = CheckList::new(evaluation);
        let output = checklist.to_string();
        assert!(output.contains("⚠ Unresolved fee of 1 BTC"));
        assert!(output.contains("No issues detected!"));

        let evaluations = checklist.into_result().unwrap();
        assert_eq!(evaluations.len(), 1);
    }
}
