//! Data stores: the local buffer and the remote commit path

pub mod local;
pub mod remote;
pub mod sink;

pub use local::{CommitSummary, LocalDataStore};
pub use remote::RemoteDataStore;
pub use sink::{BatchReceipt, ConsoleSink, RemoteSink};
