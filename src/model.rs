pub use self::{amount::*, exchange_rate::*, operation::*, stats::*, tax_event::*, worksheet::*};

mod amount;
pub mod constants;
pub(crate) mod exchange_rate;
pub(crate) mod operation;
mod stats;
pub(crate) mod tax_event;
mod worksheet;
