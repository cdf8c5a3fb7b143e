//! Shared types for solar charge-controller configuration profiles.
//!
//! This crate holds the plain data model used by the validator, the store,
//! the device applier and the HTTP service:
//!
//! - [`ChargerSettings`]: the full parameter set of the charge controller
//! - [`ParameterId`] / [`ParameterGroup`]: device-settable parameters and the
//!   ordered groups they are applied in
//! - [`GroupPayload`]: what a device channel receives for one apply step
//!
//! # Example
//!
//! ```
//! use solcharge_types::{ChargerSettings, GroupPayload, ParameterGroup};
//!
//! let settings = ChargerSettings::default();
//! let payload = GroupPayload::from_settings(ParameterGroup::Voltages, &settings);
//! assert_eq!(payload.parameters.len(), 3);
//! ```

pub mod error;
pub mod params;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use params::{GroupPayload, Parameter, ParameterGroup, ParameterId, ParameterValue, ValueKind};
pub use types::{ChargerSettings, Chemistry};
