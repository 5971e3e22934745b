pub mod address;
pub mod amount;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod rpc;
pub mod store;
pub mod wallet;

pub use error::ClientError;
pub use gateway::LedgerGateway;
pub use store::SyncStore;
