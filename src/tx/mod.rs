//! Transaction submission module with fee escalation and pacing

mod escalator;
mod gas;
mod pending;
mod sender;

pub use escalator::{Escalation, FeeEscalator};
pub use gas::PacingController;
pub use pending::{Attempt, PendingSet};
pub use sender::TransactionSender;
