//! Device parameters and the groups they are applied in.
//!
//! The device accepts its settings one logical group at a time. Groups are
//! applied in [`ParameterGroup::APPLY_ORDER`]: chemistry and capacity first, so
//! that voltage thresholds are never interpreted under a stale chemistry
//! setting, then the stage voltages, then the current limits.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::types::ChargerSettings;

/// A batch of related parameters sent to the device as one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ParameterGroup {
    /// Chemistry, capacity, termination threshold and sensor scaling.
    Battery,
    /// Bulk, absorption and float setpoints.
    Voltages,
    /// Charge current limit and DC supply assist.
    CurrentLimits,
}

impl ParameterGroup {
    /// Order in which groups are sent to the device.
    pub const APPLY_ORDER: [ParameterGroup; 3] = [
        ParameterGroup::Battery,
        ParameterGroup::Voltages,
        ParameterGroup::CurrentLimits,
    ];

    /// Stable name of the group.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterGroup::Battery => "battery",
            ParameterGroup::Voltages => "voltages",
            ParameterGroup::CurrentLimits => "current-limits",
        }
    }

    /// Parameters that belong to this group, in send order.
    #[must_use]
    pub fn parameters(&self) -> &'static [ParameterId] {
        match self {
            ParameterGroup::Battery => &[
                ParameterId::BatteryCapacity,
                ParameterId::IsLithium,
                ParameterId::ThresholdPercentage,
                ParameterId::FactorDivider,
            ],
            ParameterGroup::Voltages => &[
                ParameterId::BulkVoltage,
                ParameterId::AbsorptionVoltage,
                ParameterId::FloatVoltage,
            ],
            ParameterGroup::CurrentLimits => &[
                ParameterId::MaxAllowedCurrent,
                ParameterId::UseFuenteDc,
                ParameterId::FuenteDcAmps,
            ],
        }
    }
}

impl fmt::Display for ParameterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterGroup {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        ParameterGroup::APPLY_ORDER
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::UnknownGroup(s.to_string()))
    }
}

/// Kind of value a parameter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ValueKind {
    /// Floating point value.
    Real,
    /// Boolean flag.
    Bool,
    /// Unsigned integer.
    Integer,
}

impl ValueKind {
    /// Name used in error messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Real => "real",
            ValueKind::Bool => "boolean",
            ValueKind::Integer => "integer",
        }
    }
}

/// Identifier of a single device-settable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum ParameterId {
    BatteryCapacity,
    IsLithium,
    ThresholdPercentage,
    FactorDivider,
    BulkVoltage,
    AbsorptionVoltage,
    FloatVoltage,
    MaxAllowedCurrent,
    #[cfg_attr(feature = "serde", serde(rename = "useFuenteDC"))]
    UseFuenteDc,
    #[cfg_attr(feature = "serde", serde(rename = "fuenteDC_Amps"))]
    FuenteDcAmps,
}

impl ParameterId {
    /// Every parameter, grouped in apply order.
    pub const ALL: [ParameterId; 10] = [
        ParameterId::BatteryCapacity,
        ParameterId::IsLithium,
        ParameterId::ThresholdPercentage,
        ParameterId::FactorDivider,
        ParameterId::BulkVoltage,
        ParameterId::AbsorptionVoltage,
        ParameterId::FloatVoltage,
        ParameterId::MaxAllowedCurrent,
        ParameterId::UseFuenteDc,
        ParameterId::FuenteDcAmps,
    ];

    /// Name of the parameter in the device API.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ParameterId::BatteryCapacity => "batteryCapacity",
            ParameterId::IsLithium => "isLithium",
            ParameterId::ThresholdPercentage => "thresholdPercentage",
            ParameterId::FactorDivider => "factorDivider",
            ParameterId::BulkVoltage => "bulkVoltage",
            ParameterId::AbsorptionVoltage => "absorptionVoltage",
            ParameterId::FloatVoltage => "floatVoltage",
            ParameterId::MaxAllowedCurrent => "maxAllowedCurrent",
            ParameterId::UseFuenteDc => "useFuenteDC",
            ParameterId::FuenteDcAmps => "fuenteDC_Amps",
        }
    }

    /// Group the parameter is applied with.
    #[must_use]
    pub fn group(&self) -> ParameterGroup {
        match self {
            ParameterId::BatteryCapacity
            | ParameterId::IsLithium
            | ParameterId::ThresholdPercentage
            | ParameterId::FactorDivider => ParameterGroup::Battery,
            ParameterId::BulkVoltage
            | ParameterId::AbsorptionVoltage
            | ParameterId::FloatVoltage => ParameterGroup::Voltages,
            ParameterId::MaxAllowedCurrent
            | ParameterId::UseFuenteDc
            | ParameterId::FuenteDcAmps => ParameterGroup::CurrentLimits,
        }
    }

    /// Kind of value the parameter expects.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            ParameterId::IsLithium | ParameterId::UseFuenteDc => ValueKind::Bool,
            ParameterId::FactorDivider => ValueKind::Integer,
            _ => ValueKind::Real,
        }
    }

    /// Unit of measure, if any.
    #[must_use]
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            ParameterId::BatteryCapacity => Some("Ah"),
            ParameterId::ThresholdPercentage => Some("%"),
            ParameterId::MaxAllowedCurrent => Some("mA"),
            ParameterId::BulkVoltage
            | ParameterId::AbsorptionVoltage
            | ParameterId::FloatVoltage => Some("V"),
            ParameterId::FuenteDcAmps => Some("A"),
            ParameterId::IsLithium | ParameterId::UseFuenteDc | ParameterId::FactorDivider => {
                None
            }
        }
    }

    /// Short human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ParameterId::BatteryCapacity => "Battery bank capacity",
            ParameterId::IsLithium => "Lithium chemistry (false for lead-acid, AGM, GEL)",
            ParameterId::ThresholdPercentage => "Charge termination threshold",
            ParameterId::FactorDivider => "Current sensor scaling factor",
            ParameterId::BulkVoltage => "Bulk stage voltage",
            ParameterId::AbsorptionVoltage => "Absorption stage voltage",
            ParameterId::FloatVoltage => "Float stage voltage",
            ParameterId::MaxAllowedCurrent => "Maximum charge current",
            ParameterId::UseFuenteDc => "Enable auxiliary DC supply assist",
            ParameterId::FuenteDcAmps => "Auxiliary DC supply current",
        }
    }

    /// Read this parameter's value out of a settings record.
    #[must_use]
    pub fn value_of(&self, settings: &ChargerSettings) -> ParameterValue {
        match self {
            ParameterId::BatteryCapacity => ParameterValue::Real(settings.battery_capacity),
            ParameterId::IsLithium => ParameterValue::Bool(settings.is_lithium),
            ParameterId::ThresholdPercentage => {
                ParameterValue::Real(settings.threshold_percentage)
            }
            ParameterId::FactorDivider => ParameterValue::Integer(settings.factor_divider),
            ParameterId::BulkVoltage => ParameterValue::Real(settings.bulk_voltage),
            ParameterId::AbsorptionVoltage => ParameterValue::Real(settings.absorption_voltage),
            ParameterId::FloatVoltage => ParameterValue::Real(settings.float_voltage),
            ParameterId::MaxAllowedCurrent => ParameterValue::Real(settings.max_allowed_current),
            ParameterId::UseFuenteDc => ParameterValue::Bool(settings.use_fuente_dc),
            ParameterId::FuenteDcAmps => ParameterValue::Real(settings.fuente_dc_amps),
        }
    }

    /// Coerce a loosely typed value into the kind this parameter expects.
    ///
    /// Integers are accepted for real parameters, and whole non-negative reals
    /// for integer parameters. Booleans are never coerced.
    pub fn coerce(&self, value: ParameterValue) -> ParseResult<ParameterValue> {
        let invalid = || ParseError::InvalidValue {
            parameter: self.name(),
            expected: self.kind().as_str(),
        };
        match (self.kind(), value) {
            (ValueKind::Bool, ParameterValue::Bool(b)) => Ok(ParameterValue::Bool(b)),
            (ValueKind::Real, ParameterValue::Real(v)) => Ok(ParameterValue::Real(v)),
            (ValueKind::Real, ParameterValue::Integer(v)) => Ok(ParameterValue::Real(f64::from(v))),
            (ValueKind::Integer, ParameterValue::Integer(v)) => Ok(ParameterValue::Integer(v)),
            (ValueKind::Integer, ParameterValue::Real(v))
                if v.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&v) =>
            {
                Ok(ParameterValue::Integer(v as u32))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParameterId {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        ParameterId::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ParseError::UnknownParameter(s.to_string()))
    }
}

/// Value of a single device parameter.
///
/// Deserializes from a bare JSON value: `true`, `1`, `14.4`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ParameterValue {
    Bool(bool),
    Integer(u32),
    Real(f64),
}

impl ParameterValue {
    /// Numeric view of the value, if it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Real(v) => Some(*v),
            ParameterValue::Integer(v) => Some(f64::from(*v)),
            ParameterValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(b) => write!(f, "{}", b),
            ParameterValue::Integer(v) => write!(f, "{}", v),
            ParameterValue::Real(v) => write!(f, "{}", v),
        }
    }
}

/// A parameter together with the value to send.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Parameter {
    pub id: ParameterId,
    pub value: ParameterValue,
}

/// What the device channel receives for one apply step.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPayload {
    /// The group being applied.
    pub group: ParameterGroup,
    /// Parameters in send order.
    pub parameters: Vec<Parameter>,
}

impl GroupPayload {
    /// Build the payload for `group` from a full settings record.
    #[must_use]
    pub fn from_settings(group: ParameterGroup, settings: &ChargerSettings) -> Self {
        let parameters = group
            .parameters()
            .iter()
            .map(|id| Parameter {
                id: *id,
                value: id.value_of(settings),
            })
            .collect();
        Self { group, parameters }
    }

    /// A payload carrying a single parameter.
    #[must_use]
    pub fn single(parameter: Parameter) -> Self {
        Self {
            group: parameter.id.group(),
            parameters: vec![parameter],
        }
    }

    /// Identifiers of the parameters in this payload.
    pub fn ids(&self) -> impl Iterator<Item = ParameterId> + '_ {
        self.parameters.iter().map(|p| p.id)
    }
}
