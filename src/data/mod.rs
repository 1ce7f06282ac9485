pub mod fetch_pool;
pub mod history;
pub mod instruments;
pub mod sync;
pub mod writer;

pub use fetch_pool::run_in_pool;
pub use history::InstrumentService;
pub use instruments::InstrumentDirectory;
pub use sync::{merge_records, resolve_window, SyncCoordinator, SyncState};
pub use writer::{PersistenceWriter, WriteQueue, WriteRequest, WriterStats};
