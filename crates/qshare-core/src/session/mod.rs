//! Session state and its discovery driver

pub mod coordinator;
pub mod driver;

pub use coordinator::{SessionCoordinator, UploadOutcome};
pub use driver::{DriverConfig, SessionDriver, SessionEvent};
