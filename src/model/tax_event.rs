use crate::model::{amount::FiatAmount, operation::Operation};
use std::fmt;

/// Taxation categories. Labels follow the jurisdiction's own wording.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum TaxCategory {
    /// Gains from private disposals.
    PrivateSale,

    /// Interest received on fiat holdings.
    CapitalIncome,

    /// Income from services: lending or staking rewards, commissions.
    OtherIncome,

    /// Deductible fees.
    Miscellaneous,
}

/// One taxable (or tax-reducing) outcome of a single operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaxEvent {
    pub category: TaxCategory,
    pub taxed_gain: FiatAmount,
    pub operation: Operation,
    pub remark: String,
}

impl TaxCategory {
    pub const ALL: [TaxCategory; 4] = [
        Self::PrivateSale,
        Self::CapitalIncome,
        Self::OtherIncome,
        Self::Miscellaneous,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::PrivateSale => "Einkünfte aus privaten Veräußerungsgeschäften",
            Self::CapitalIncome => "Einkünfte aus Kapitalvermögen",
            Self::OtherIncome => "Einkünfte aus sonstigen Leistungen",
            Self::Miscellaneous => "Sonstige Einkünfte",
        }
    }
}

impl fmt::Display for TaxCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TaxEvent {
    pub fn new(category: TaxCategory, taxed_gain: FiatAmount, operation: &Operation) -> Self {
        Self {
            category,
            taxed_gain,
            operation: operation.clone(),
            remark: operation.remark().unwrap_or_default().to_string(),
        }
    }

    pub fn with_remark(mut self, remark: String) -> Self {
        self.remark = remark;
        self
    }
}
