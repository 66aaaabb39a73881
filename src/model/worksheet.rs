use crate::basis::{merge_tax_events, AssetEvaluation, Jurisdiction};
use crate::model::{AssetSymbol, FiatAmount, OperationKind, PriceOracle, Quantity, TaxCategory};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, fmt::Display};
use tracing::warn;

/// One row per tax event, across all assets, ordered by time.
#[derive(Debug)]
pub struct TaxWorksheet {
    fiat: AssetSymbol,
    worksheet: Vec<TaxWorksheetRow>,
}

#[derive(Debug)]
struct TaxWorksheetRow {
    asset: AssetSymbol,     // Column A
    time: DateTime<Utc>,    // Column B
    platform: String,       // Column C
    kind: OperationKind,    // Column D
    amount: Quantity,       // Column E
    category: TaxCategory,  // Column F
    taxed_gain: FiatAmount, // Column G
    remark: String,         // Column H
}

/// Unrealized holdings: one row per residual lot, valued at the evaluation deadline.
#[derive(Debug)]
pub struct HoldingsWorksheet {
    fiat: AssetSymbol,
    deadline: DateTime<Utc>,
    worksheet: Vec<HoldingsWorksheetRow>,
}

#[derive(Debug)]
struct HoldingsWorksheetRow {
    asset: AssetSymbol,             // Column A
    platform: String,               // Column B
    acquired: DateTime<Utc>,        // Column C
    kind: OperationKind,            // Column D
    remaining: Quantity,            // Column E
    cost_basis: Option<FiatAmount>, // Column F
    value: Option<FiatAmount>,      // Column G
    gain: Option<FiatAmount>,       // Column H
    taxable: bool,                  // Column I
}

/// Taxed gain totals per category, followed by the unrealized position at the deadline.
#[derive(Debug)]
pub struct Summary {
    fiat: AssetSymbol,
    tax_year: i32,
    deadline: DateTime<Utc>,
    totals: BTreeMap<TaxCategory, FiatAmount>,
    holdings: BTreeMap<AssetSymbol, AssetHoldings>,
    unrealized_gain: FiatAmount,
    unrealized_taxable_gain: FiatAmount,
}

/// Everything still held of one asset at the deadline.
#[derive(Debug)]
struct AssetHoldings {
    remaining: Quantity,
    value: Option<FiatAmount>,
}

impl TaxWorksheet {
    pub fn new(evaluations: &[AssetEvaluation], jurisdiction: &Jurisdiction) -> Self {
        let worksheet = merge_tax_events(evaluations)
            .into_iter()
            .map(|event| TaxWorksheetRow {
                asset: event.operation.asset().clone(),
                time: event.operation.time(),
                platform: event.operation.platform().to_string(),
                kind: event.operation.kind(),
                amount: event.operation.amount(),
                category: event.category,
                taxed_gain: event.taxed_gain,
                remark: event.remark.clone(),
            })
            .collect();

        Self {
            fiat: jurisdiction.fiat.clone(),
            worksheet,
        }
    }

    pub fn len(&self) -> usize {
        self.worksheet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worksheet.is_empty()
    }
}

impl Display for TaxWorksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            concat!(
                // Columns A-E
                r#""Asset","Time","Platform","Operation","Amount","#,
                // Columns F-H
                r#""Category","Taxed Gain ({fiat})","Remark""#,
            ),
            fiat = self.fiat,
        )?;

        for row in &self.worksheet {
            writeln!(f, "{row}")?;
        }

        Ok(())
    }
}

impl Display for TaxWorksheetRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Columns A-E
        write!(
            f,
            r#""{asset}","{time}","{platform}","{kind}","{amount}","#,
            asset = escape(self.asset.as_str()),
            time = self.time.format("%F %T %Z"),
            platform = escape(&self.platform),
            kind = self.kind,
            amount = self.amount,
        )?;
        // Columns F-H
        write!(
            f,
            r#""{category}","{taxed_gain}","{remark}""#,
            category = self.category,
            taxed_gain = self.taxed_gain,
            remark = escape(&self.remark),
        )
    }
}

impl HoldingsWorksheet {
    /// Value every residual lot at the jurisdiction's deadline, as if it were sold then.
    ///
    /// A missing price leaves the value and gain cells empty. Holdings of the reporting fiat are
    /// never taxable.
    pub fn new<P>(evaluations: &[AssetEvaluation], jurisdiction: &Jurisdiction, oracle: &P) -> Self
    where
        P: PriceOracle + ?Sized,
    {
        let fiat = &jurisdiction.fiat;
        let deadline = jurisdiction.deadline();

        let worksheet = evaluations
            .iter()
            .flat_map(|evaluation| &evaluation.holdings)
            .map(|lot| {
                let operation = lot.operation();
                let remaining = lot.remaining();

                let cost_basis = oracle
                    .partial_cost(operation, remaining, fiat)
                    .map_err(|err| {
                        warn!("No cost basis for lot at {}: {err}", operation.describe_location());
                    })
                    .ok();
                let value = oracle
                    .price(operation.platform(), operation.asset(), deadline, fiat)
                    .map(|price| remaining.value_at(price))
                    .map_err(|err| {
                        warn!(
                            "Unable to value {asset} holdings at {deadline}: {err}",
                            asset = operation.asset(),
                            deadline = deadline.format("%F %T %Z"),
                        );
                    })
                    .ok();
                let gain = value.zip(cost_basis).map(|(value, cost_basis)| value - cost_basis);
                let taxable = operation.asset() != fiat
                    && jurisdiction.is_taxable_disposal(operation, deadline);

                HoldingsWorksheetRow {
                    asset: operation.asset().clone(),
                    platform: operation.platform().to_string(),
                    acquired: operation.time(),
                    kind: operation.kind(),
                    remaining,
                    cost_basis,
                    value,
                    gain,
                    taxable,
                }
            })
            .collect();

        Self {
            fiat: fiat.clone(),
            deadline,
            worksheet,
        }
    }

    pub fn len(&self) -> usize {
        self.worksheet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worksheet.is_empty()
    }
}

impl Display for HoldingsWorksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            concat!(
                // Columns A-E
                r#""Asset","Platform","Acquired","Operation","Remaining","#,
                // Columns F-I
                r#""Cost Basis ({fiat})","Value at {deadline} ({fiat})","#,
                r#""Unrealized Gain ({fiat})","Taxable at {deadline}""#,
            ),
            fiat = self.fiat,
            deadline = self.deadline.format("%F %T %Z"),
        )?;

        for row in &self.worksheet {
            writeln!(f, "{row}")?;
        }

        Ok(())
    }
}

impl Display for HoldingsWorksheetRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cost_basis = self.cost_basis.map(|x| x.to_string()).unwrap_or_default();
        let value = self.value.map(|x| x.to_string()).unwrap_or_default();
        let gain = self.gain.map(|x| x.to_string()).unwrap_or_default();

        // Columns A-E
        write!(
            f,
            r#""{asset}","{platform}","{acquired}","{kind}","{remaining}","#,
            asset = escape(self.asset.as_str()),
            platform = escape(&self.platform),
            acquired = self.acquired.format("%F %T %Z"),
            kind = self.kind,
            remaining = self.remaining,
        )?;
        // Columns F-I
        write!(
            f,
            r#""{cost_basis}","{value}","{gain}","{taxable}""#,
            taxable = self.taxable,
        )
    }
}

impl Summary {
    /// Sum the realized tax events and the unrealized holdings.
    ///
    /// Lots without a known gain are left out of the unrealized totals. An asset's value is
    /// unknown when any of its lots could not be valued.
    pub fn new(
        evaluations: &[AssetEvaluation],
        jurisdiction: &Jurisdiction,
        holdings: &HoldingsWorksheet,
    ) -> Self {
        let mut totals: BTreeMap<_, _> = TaxCategory::ALL
            .into_iter()
            .map(|category| (category, FiatAmount::default()))
            .collect();

        for event in evaluations.iter().flat_map(|evaluation| &evaluation.tax_events) {
            *totals.entry(event.category).or_default() += event.taxed_gain;
        }

        let mut per_asset = BTreeMap::<AssetSymbol, AssetHoldings>::new();
        let mut unrealized_gain = FiatAmount::default();
        let mut unrealized_taxable_gain = FiatAmount::default();

        for row in &holdings.worksheet {
            let entry = per_asset.entry(row.asset.clone()).or_insert_with(|| AssetHoldings {
                remaining: Quantity::default(),
                value: Some(FiatAmount::default()),
            });
            entry.remaining += row.remaining;
            entry.value = entry.value.zip(row.value).map(|(total, value)| total + value);

            if let Some(gain) = row.gain {
                unrealized_gain += gain;
                if row.taxable {
                    unrealized_taxable_gain += gain;
                }
            }
        }

        Self {
            fiat: jurisdiction.fiat.clone(),
            tax_year: jurisdiction.tax_year,
            deadline: holdings.deadline,
            totals,
            holdings: per_asset,
            unrealized_gain,
            unrealized_taxable_gain,
        }
    }

    pub fn total(&self, category: TaxCategory) -> FiatAmount {
        self.totals.get(&category).copied().unwrap_or_default()
    }

    pub fn unrealized_gain(&self) -> FiatAmount {
        self.unrealized_gain
    }

    /// The part of the unrealized gain that would be taxed if everything were sold at the
    /// deadline.
    pub fn unrealized_taxable_gain(&self) -> FiatAmount {
        self.unrealized_taxable_gain
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Tax Summary {}", self.tax_year)?;
        writeln!(f, "=== ======= ====")?;
        writeln!(f)?;

        for (category, total) in &self.totals {
            writeln!(f, "{category}: {total} {fiat}", fiat = self.fiat)?;
        }

        if !self.holdings.is_empty() {
            writeln!(f)?;
            writeln!(f, "Holdings at {}", self.deadline.format("%F %T %Z"))?;
            for (asset, holdings) in &self.holdings {
                match holdings.value {
                    Some(value) => writeln!(
                        f,
                        "{asset}: {remaining} ({value} {fiat})",
                        remaining = holdings.remaining,
                        fiat = self.fiat,
                    )?,
                    None => writeln!(f, "{asset}: {} (no price)", holdings.remaining)?,
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "Unrealized gain: {} {}", self.unrealized_gain, self.fiat)?;
        writeln!(
            f,
            "Unrealized taxable gain: {} {}",
            self.unrealized_taxable_gain, self.fiat
        )?;

        Ok(())
    }
}

fn escape(field: &str) -> String {
    field.replace('"', r#""""#)
}
