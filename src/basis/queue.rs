//! Balance queue: the resident acquisition lots of a single asset.
use crate::basis::policy::Principle;
use crate::model::{AssetSymbol, Operation, Quantity};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Cannot take a zero or negative amount")]
    ZeroOrNegative,

    #[error("Balance queue for {expected} cannot hold {found}")]
    AssetMismatch {
        expected: AssetSymbol,
        found: AssetSymbol,
    },
}

/// One acquisition that has not been fully disposed of.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Lot {
    operation: Operation,
    consumed: Quantity,
}

/// The part of a lot taken by one disposal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SoldPortion {
    pub operation: Operation,
    pub amount: Quantity,
}

/// Outcome of [`BalanceQueue::consume`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Consumed {
    /// Portions in the order their lots were drained.
    pub portions: Vec<SoldPortion>,

    /// The unmet quantity when the queue ran dry. `None` when fully satisfied.
    pub shortfall: Option<Quantity>,
}

/// Ordered lots of a single asset plus the fees that could not be netted yet.
///
/// Lots are kept in insertion order. The principle only decides which end `consume` reads from;
/// fees are always taken from the most recently added lot.
#[derive(Debug)]
pub struct BalanceQueue {
    asset: AssetSymbol,
    principle: Principle,
    lots: VecDeque<Lot>,

    // It can happen that a venue takes fees before the matching acquisition shows up in the
    // ledger. These are netted on the next `put`.
    pending_fees: Vec<Quantity>,
}

impl Lot {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            consumed: Quantity::default(),
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn consumed(&self) -> Quantity {
        self.consumed
    }

    pub fn remaining(&self) -> Quantity {
        self.operation.amount() - self.consumed
    }
}

impl Consumed {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_none()
    }

    /// Total quantity actually taken from the queue.
    pub fn amount(&self) -> Quantity {
        self.portions.iter().map(|portion| portion.amount).sum()
    }
}

impl BalanceQueue {
    pub fn new(asset: AssetSymbol, principle: Principle) -> Self {
        Self {
            asset,
            principle,
            lots: VecDeque::new(),
            pending_fees: Vec::new(),
        }
    }

    pub fn asset(&self) -> &AssetSymbol {
        &self.asset
    }

    /// Resident lots in insertion order.
    pub fn lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter()
    }

    pub fn into_lots(self) -> Vec<Lot> {
        self.lots.into()
    }

    pub fn is_empty(&self) -> bool {
        self.lots.is_empty()
    }

    /// Sum of the remaining quantity of all resident lots.
    pub fn balance(&self) -> Quantity {
        self.lots.iter().map(Lot::remaining).sum()
    }

    /// Fees still waiting for an acquisition to be netted against.
    pub fn pending_fee(&self) -> Quantity {
        self.pending_fees.iter().sum()
    }

    /// Add an acquisition, then retry buffered fees oldest first.
    pub fn put(&mut self, operation: Operation) -> Result<(), QueueError> {
        if operation.asset() != &self.asset {
            return Err(QueueError::AssetMismatch {
                expected: self.asset.clone(),
                found: operation.asset().clone(),
            });
        }

        trace!(
            "{}: put {} from {} at {}",
            self.asset,
            operation.amount(),
            operation.kind(),
            operation.time(),
        );
        self.lots.push_back(Lot::new(operation));

        for fee in std::mem::take(&mut self.pending_fees) {
            self.net_fee(fee);
        }

        Ok(())
    }

    /// Deduct a fee from the most recently added lots, buffering whatever cannot be absorbed.
    pub fn remove_fee(&mut self, fee: Quantity) -> Result<(), QueueError> {
        if !fee.is_positive() {
            return Err(QueueError::ZeroOrNegative);
        }

        self.net_fee(fee);

        Ok(())
    }

    fn net_fee(&mut self, mut fee: Quantity) {
        while let Some(lot) = self.lots.back_mut() {
            let remaining = lot.remaining();

            if remaining > fee {
                lot.consumed += fee;
                trace!("{}: fee {fee} netted, {} left in lot", self.asset, lot.remaining());

                return;
            }

            // Lot is used up by the fee; carry the rest to the previous lot.
            fee -= remaining;
            self.lots.pop_back();
            trace!("{}: fee drained a lot of {remaining}", self.asset);

            if fee.is_zero() {
                return;
            }
        }

        trace!("{}: buffering fee of {fee}", self.asset);
        self.pending_fees.push(fee);
    }

    /// Take `amount` units from the end selected by the principle.
    ///
    /// Running out of lots is not an error here: the unmet quantity is reported in
    /// [`Consumed::shortfall`] and the caller decides.
    pub fn consume(&mut self, amount: Quantity) -> Result<Consumed, QueueError> {
        // Special case for taking amount <= 0.
        // This avoids touching any lots.
        if !amount.is_positive() {
            return Err(QueueError::ZeroOrNegative);
        }

        let mut consumed = Consumed::default();
        let mut wanted = amount;

        while wanted.is_positive() {
            let lot = match self.principle {
                Principle::Fifo => self.lots.front_mut(),
                Principle::Lifo => self.lots.back_mut(),
            };
            let Some(lot) = lot else {
                consumed.shortfall = Some(wanted);
                break;
            };

            let remaining = lot.remaining();
            if remaining > wanted {
                // Partial drain; the lot stays resident.
                lot.consumed += wanted;
                consumed.portions.push(SoldPortion {
                    operation: lot.operation.clone(),
                    amount: wanted,
                });
                wanted = Quantity::default();
            } else {
                let lot = match self.principle {
                    Principle::Fifo => self.lots.pop_front(),
                    Principle::Lifo => self.lots.pop_back(),
                };
                if let Some(lot) = lot {
                    consumed.portions.push(SoldPortion {
                        operation: lot.operation,
                        amount: remaining,
                    });
                }
                wanted -= remaining;
            }
        }

        trace!(
            "{}: consumed {} of {amount} across {} lot(s)",
            self.asset,
            consumed.amount(),
            consumed.portions.len(),
        );

        Ok(consumed)
    }
}
