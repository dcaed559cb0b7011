//! USB device control and data engine
//!
//! Built on the transfer primitives of `hierodule-core`:
//!
//! - SETUP packet wire format
//! - Per-endpoint stage, toggle and halt state
//! - Endpoint 0 control transfers with a request handler registry
//! - A device driver with standard requests and bulk data endpoints
//! - CDC-ACM line coding requests

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod log;

pub mod cdc;
pub mod control;
pub mod device;
pub mod endpoint;
pub mod setup;

pub use cdc::{CdcAcm, LineCoding};
pub use control::{ControlPipe, HandlerRegistry, Rejected, Request, RequestHandler};
pub use device::{read_blocking, write_blocking, DeviceState, UsbDevice, DATA_ENDPOINT};
pub use endpoint::{EndpointState, Stage};
pub use setup::{DataDirection, Recipient, RequestKind, RequestType, SetupError, SetupPacket};
