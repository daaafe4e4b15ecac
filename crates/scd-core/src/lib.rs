pub mod config;
pub mod logging;

pub mod assembly;
pub mod batch;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod job;
pub mod matcher;
pub mod page;
pub mod progress;
pub mod retrieve;
pub mod storage;

pub use error::RetrievalError;
pub use retrieve::{RetrievalReport, RetrieveSettings, Retriever};

#[cfg(test)]
pub(crate) mod testing;
