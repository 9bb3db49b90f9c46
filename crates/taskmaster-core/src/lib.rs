pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TaskMasterConfig;
pub use error::{Result, TaskMasterError};
pub use types::*;
