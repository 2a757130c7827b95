// SPDX-License-Identifier: Apache-2.0

//! qore-core: the driver capability set consumed by the QoreDB proxy.
//!
//! Drivers implement the traits in [`traits`]; failures are reported as
//! [`DriverError`]. The `mock` feature adds a scripted in-memory driver.

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod traits;
pub mod value;

pub use error::{DriverError, DriverResult};
pub use traits::{Connection, Cursor, DataSource, DriverObject, PreparedStatement, Statement};
pub use value::{KeyRequest, ParameterKey, Value};
