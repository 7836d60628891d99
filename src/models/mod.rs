pub mod coordinate;
pub mod onu;

pub use coordinate::DeviceCoordinate;
pub use onu::{OnuRecord, OnuStatus, OpticalPower, SerialNumber};
