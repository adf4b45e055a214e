pub mod address;
pub mod audit;
pub mod logging;
pub mod status;

pub use address::{Address, AddressError};
pub use status::{Classification, OutcomeCode, Status};
pub use tracing;
