//! Business logic between the HTTP handlers and the repository.

pub mod audit;
pub mod bootstrap;
pub mod commission;
pub mod password;
pub mod risk;
pub mod token;
pub mod wallet;

pub use audit::AuditLogger;
pub use commission::CommissionCalculator;
pub use risk::{RiskChecker, RiskError};
pub use token::{IssuedToken, TokenService};
pub use wallet::{BulkOutcome, WalletError, WalletService};
