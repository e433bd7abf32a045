//! Common utilities for usbredir-server
//!
//! Error handling, logging setup and the USB device identifier shared by the
//! server library and binary.

pub mod device_id;
pub mod error;
pub mod logging;

pub use device_id::DeviceIdentity;
pub use error::{Error, Result};
pub use logging::{setup_logging, verbosity_filter};
