//! Transactional batch boundary

pub mod boundary;
pub mod error;
pub mod store;

pub use boundary::{TransactionBoundary, TxHandle};
pub use error::TransactionError;
pub use store::{JournalingTransactionalStore, NoopTransactionalStore, TransactionalStore};
