//! Mutual exclusion for device writes.
//!
//! There is one physical charge controller. The gate keeps two rules:
//!
//! - at most one write in flight per target (a configuration name or a
//!   single parameter);
//! - when the device channel cannot serve overlapping calls, at most one
//!   write in flight overall.
//!
//! A request that cannot pass is rejected immediately, never queued. The
//! [`ApplyPermit`] releases both rules when dropped, whatever the outcome.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use solcharge_types::ParameterId;

/// What a device write targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplyTarget {
    /// A stored configuration, by name.
    Configuration(String),
    /// A single device parameter.
    Parameter(ParameterId),
}

impl fmt::Display for ApplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyTarget::Configuration(name) => write!(f, "configuration '{}'", name),
            ApplyTarget::Parameter(id) => write!(f, "parameter {}", id),
        }
    }
}

/// Why the gate refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateBusy {
    /// The same target is already being written.
    SameTarget(ApplyTarget),
    /// Another write holds the device.
    DeviceBusy,
}

impl fmt::Display for GateBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateBusy::SameTarget(target) => write!(f, "{} is already being applied", target),
            GateBusy::DeviceBusy => f.write_str("another apply is in progress on the device"),
        }
    }
}

type InFlight = Arc<Mutex<HashSet<ApplyTarget>>>;

/// The device write gate.
#[derive(Debug)]
pub struct ApplyGate {
    device: Option<Arc<tokio::sync::Mutex<()>>>,
    in_flight: InFlight,
}

impl ApplyGate {
    /// Create a gate. `serialize_all` enables the single device-wide permit.
    pub fn new(serialize_all: bool) -> Self {
        Self {
            device: serialize_all.then(|| Arc::new(tokio::sync::Mutex::new(()))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether all writes are serialized device-wide.
    pub fn is_serialized(&self) -> bool {
        self.device.is_some()
    }

    /// Try to start a write to `target`.
    pub fn try_acquire(&self, target: ApplyTarget) -> Result<ApplyPermit, GateBusy> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains(&target) {
            return Err(GateBusy::SameTarget(target));
        }

        let device = match &self.device {
            Some(lock) => Some(
                Arc::clone(lock)
                    .try_lock_owned()
                    .map_err(|_| GateBusy::DeviceBusy)?,
            ),
            None => None,
        };

        in_flight.insert(target.clone());
        Ok(ApplyPermit {
            target,
            in_flight: Arc::clone(&self.in_flight),
            _device: device,
        })
    }

    /// Targets currently being written.
    pub fn in_flight(&self) -> Vec<ApplyTarget> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Proof that a write may proceed. Dropping it opens the gate again.
#[derive(Debug)]
pub struct ApplyPermit {
    target: ApplyTarget,
    in_flight: InFlight,
    _device: Option<OwnedMutexGuard<()>>,
}

impl ApplyPermit {
    /// The target this permit covers.
    pub fn target(&self) -> &ApplyTarget {
        &self.target
    }
}

impl Drop for ApplyPermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.target);
    }
}
