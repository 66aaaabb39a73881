pub use crate::basis::{CheckListError, ConfigurationError, QueueError, TaxError};
pub use crate::imports::ledger::{LedgerError, RowError};
pub use crate::model::{ExchangeRateError, ExchangeRatesDbError, ParseAmountError};
pub use crate::model::{UnsupportedOperationError, ValidationError};
