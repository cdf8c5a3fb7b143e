//! Validation and device apply engine for solar charge-controller profiles.
//!
//! This crate holds the parts of the system that do not care where profiles
//! are stored or how requests arrive:
//!
//! - **Validation**: [`SettingsValidator`] checks every profile invariant as
//!   a separate rule and reports structured [`Violation`]s
//! - **Device channel**: the [`DeviceChannel`] trait, implemented by the HTTP
//!   bridge ([`HttpChannel`], behind the `http-channel` feature) and by
//!   [`MockChannel`] for tests
//! - **Apply**: [`DeviceApplier`] sends parameter groups in order under a hard
//!   deadline and reports exactly what reached the device
//!
//! # Partial application
//!
//! An apply is not a transaction. When a group fails, groups already
//! acknowledged stay on the device and nothing is retried. The
//! [`ApplyReport`] always lists the applied and unapplied groups, so callers
//! can decide what to do next.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use solcharge_core::{ApplyOutcome, DeviceApplier, MockChannel, SettingsValidator};
//! use solcharge_types::ChargerSettings;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = ChargerSettings::default();
//!     assert!(SettingsValidator::default().validate(None, &settings).is_valid());
//!
//!     let applier = DeviceApplier::new(Arc::new(MockChannel::default()), Duration::from_secs(10));
//!     let report = applier.apply(&settings, Duration::from_secs(30)).await;
//!     assert_eq!(report.outcome(), ApplyOutcome::Completed);
//! }
//! ```

pub mod applier;
pub mod error;
#[cfg(feature = "http-channel")]
pub mod http;
pub mod mock;
pub mod traits;
pub mod validation;

pub use solcharge_types as types;

pub use applier::{
    ApplyFailure, ApplyOutcome, ApplyReport, CANCEL_GRACE, DEFAULT_GROUP_TIMEOUT, DeviceApplier,
    FailureCause,
};
pub use error::{Error, Result};
#[cfg(feature = "http-channel")]
pub use http::HttpChannel;
pub use mock::{MockBehavior, MockChannel, MockChannelBuilder};
pub use traits::DeviceChannel;
pub use validation::{
    Invariant, MAX_NAME_LEN, ParameterBounds, SettingsValidator, ValidationResult, ValidationWarning,
    ValidatorConfig, Violation,
};

/// Shared handle to a device channel.
pub type SharedChannel = std::sync::Arc<dyn DeviceChannel>;
