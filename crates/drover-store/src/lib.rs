pub mod error;
pub mod memory;
pub mod postgres_store;
pub mod state;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use state::{
    partition_name_for, AckOutcome, AlertStateRow, BloatwareRow, DeviceEventRow, DeviceRow,
    DispatchRow, DispatchUpdate, EnrollmentTokenRow, ExecBatchRow, HeartbeatRow,
    HeartbeatWrite, LastStatusRow, NewDispatch, PartitionRow, StaleProjection,
    TokenConsumption,
};
pub use store::Store;
