mod error;
mod memory;
mod record;
mod traits;

pub mod conformance;

pub use error::StorageError;
pub use memory::MemoryPositionStore;
pub use record::{
    HistoryQuery, NewSample, PositionSample, DEFAULT_HISTORY_LIMIT, MAX_CLOCK_SKEW, MAX_HISTORY_LIMIT,
};
pub use traits::PositionStore;
