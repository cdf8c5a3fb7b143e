//! Validation of charger configuration profiles.
//!
//! Every invariant a profile must satisfy before it may be stored or applied
//! is a separate rule with a stable [`Invariant`] id. The validator is pure:
//! it never corrects input, it only reports.
//!
//! | # | Invariant | Rule |
//! |---|-----------|------|
//! | 1 | [`Invariant::PositiveFinite`] | voltages, currents, capacity finite and positive; `fuenteDC_Amps` may be zero; `factorDivider` positive |
//! | 2 | [`Invariant::StageOrdering`] | `floatVoltage <= absorptionVoltage <= bulkVoltage` |
//! | 3 | [`Invariant::ThresholdRange`] | `thresholdPercentage` in `[0, 100]` |
//! | 4 | [`Invariant::DcAssist`] | `fuenteDC_Amps == 0` when `useFuenteDC` is false |
//! | 5 | [`Invariant::Name`] | name non-empty, bounded, no separators or control characters |
//!
//! Besides violations, the validator reports [`ValidationWarning`]s for
//! setpoints outside the typical range of the selected chemistry. Warnings
//! never make a profile invalid.
//!
//! # Example
//!
//! ```
//! use solcharge_core::SettingsValidator;
//! use solcharge_types::ChargerSettings;
//!
//! let validator = SettingsValidator::default();
//! let mut settings = ChargerSettings::default();
//! assert!(validator.validate(Some("Casa"), &settings).is_valid());
//!
//! settings.float_voltage = 15.0;
//! let result = validator.validate(Some("Casa"), &settings);
//! assert!(!result.is_valid());
//! assert_eq!(result.violations[0].field, "floatVoltage");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use solcharge_types::{ChargerSettings, Chemistry, ParameterId, ParameterValue};

/// Maximum length of a configuration name, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Invariants a configuration profile must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Invariant {
    /// Numeric fields are finite and positive.
    PositiveFinite,
    /// Charging stage voltages are ordered float <= absorption <= bulk.
    StageOrdering,
    /// Threshold percentage lies in [0, 100].
    ThresholdRange,
    /// DC assist current is zero while DC assist is disabled.
    DcAssist,
    /// Name is usable as a store key.
    Name,
}

impl Invariant {
    /// Number of the invariant in the documented rule table.
    pub fn number(&self) -> u8 {
        match self {
            Invariant::PositiveFinite => 1,
            Invariant::StageOrdering => 2,
            Invariant::ThresholdRange => 3,
            Invariant::DcAssist => 4,
            Invariant::Name => 5,
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &'static str {
        match self {
            Invariant::PositiveFinite => "positive-finite",
            Invariant::StageOrdering => "stage-ordering",
            Invariant::ThresholdRange => "threshold-range",
            Invariant::DcAssist => "dc-assist",
            Invariant::Name => "name",
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A single violated invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Which invariant was violated.
    pub invariant: Invariant,
    /// Offending field, by its device API name (`name` for the name rule).
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl Violation {
    fn new(invariant: Invariant, field: &str, reason: impl Into<String>) -> Self {
        Self {
            invariant,
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.invariant, self.field, self.reason)
    }
}

/// Advisory findings that do not block saving or applying.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new warning types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ValidationWarning {
    /// A stage voltage is outside the typical range for the chemistry.
    VoltageOutsideChemistryRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
        chemistry: Chemistry,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::VoltageOutsideChemistryRange {
                field,
                value,
                min,
                max,
                chemistry,
            } => write!(
                f,
                "{} {} V is outside the typical {} range {}-{} V",
                field, value, chemistry, min, max
            ),
        }
    }
}

/// Result of validating a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Violated invariants, in rule order.
    pub violations: Vec<Violation>,
    /// Advisory warnings.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Whether no invariant was violated.
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Check if there are any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Whether any violation cites `invariant`.
    pub fn violates(&self, invariant: Invariant) -> bool {
        self.violations.iter().any(|v| v.invariant == invariant)
    }
}

/// Single-field limits of a parameter, as checked by
/// [`SettingsValidator::validate_parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterBounds {
    /// Lower limit, if any.
    pub min: Option<f64>,
    /// Upper limit (inclusive), if any.
    pub max: Option<f64>,
    /// Whether `min` itself is excluded.
    pub min_exclusive: bool,
}

impl ParameterBounds {
    /// Limits for `id`.
    pub fn of(id: ParameterId) -> Self {
        match id {
            ParameterId::IsLithium | ParameterId::UseFuenteDc => Self::default(),
            ParameterId::ThresholdPercentage => Self {
                min: Some(0.0),
                max: Some(100.0),
                min_exclusive: false,
            },
            ParameterId::FuenteDcAmps => Self {
                min: Some(0.0),
                max: None,
                min_exclusive: false,
            },
            ParameterId::FactorDivider => Self {
                min: Some(1.0),
                max: None,
                min_exclusive: false,
            },
            ParameterId::BatteryCapacity
            | ParameterId::MaxAllowedCurrent
            | ParameterId::BulkVoltage
            | ParameterId::AbsorptionVoltage
            | ParameterId::FloatVoltage => Self {
                min: Some(0.0),
                max: None,
                min_exclusive: true,
            },
        }
    }
}

/// Configuration for the advisory checks.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Typical stage voltage range for lithium packs (V).
    pub lithium_voltage: (f64, f64),
    /// Typical stage voltage range for lead-acid family batteries (V).
    pub lead_acid_voltage: (f64, f64),
    /// Emit chemistry range warnings.
    pub warn_on_chemistry_range: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        // 12 V bank
        Self {
            lithium_voltage: (13.0, 15.0),
            lead_acid_voltage: (12.5, 15.0),
            warn_on_chemistry_range: true,
        }
    }
}

impl ValidatorConfig {
    /// Create new validator config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scale the default 12 V ranges to a bank of `cells_of_12v` x 12 V.
    #[must_use]
    pub fn bank_multiple(mut self, cells_of_12v: u32) -> Self {
        let k = f64::from(cells_of_12v.max(1));
        let base = Self::default();
        self.lithium_voltage = (base.lithium_voltage.0 * k, base.lithium_voltage.1 * k);
        self.lead_acid_voltage = (base.lead_acid_voltage.0 * k, base.lead_acid_voltage.1 * k);
        self
    }

    /// Enable or disable chemistry range warnings.
    #[must_use]
    pub fn warn_on_chemistry_range(mut self, enabled: bool) -> Self {
        self.warn_on_chemistry_range = enabled;
        self
    }

    fn voltage_range(&self, chemistry: Chemistry) -> (f64, f64) {
        match chemistry {
            Chemistry::Lithium => self.lithium_voltage,
            Chemistry::LeadAcid => self.lead_acid_voltage,
        }
    }
}

/// Validator for charger configuration profiles.
#[derive(Debug, Clone, Default)]
pub struct SettingsValidator {
    config: ValidatorConfig,
}

impl SettingsValidator {
    /// Create a validator with the given advisory configuration.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Get the validator configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a profile, and its name when one is given.
    ///
    /// The dry-run validate operation passes `None` for the name.
    pub fn validate(&self, name: Option<&str>, settings: &ChargerSettings) -> ValidationResult {
        let mut violations = Vec::new();
        check_positive_finite(settings, &mut violations);
        check_stage_ordering(settings, &mut violations);
        check_threshold_range(settings, &mut violations);
        check_dc_assist(settings, &mut violations);
        if let Some(name) = name {
            check_name(name, &mut violations);
        }

        let warnings = if self.config.warn_on_chemistry_range {
            self.chemistry_warnings(settings)
        } else {
            Vec::new()
        };

        ValidationResult {
            violations,
            warnings,
        }
    }

    /// Validate only a configuration name.
    pub fn validate_name(&self, name: &str) -> Vec<Violation> {
        let mut violations = Vec::new();
        check_name(name, &mut violations);
        violations
    }

    /// Validate a single parameter value in isolation.
    ///
    /// Only single-field rules can be checked here: stage ordering and the DC
    /// assist rule depend on other fields and are enforced when a full
    /// profile is validated.
    pub fn validate_parameter(&self, id: ParameterId, value: ParameterValue) -> Vec<Violation> {
        let mut violations = Vec::new();
        let value = match id.coerce(value) {
            Ok(v) => v,
            Err(e) => {
                violations.push(Violation::new(
                    Invariant::PositiveFinite,
                    id.name(),
                    e.to_string(),
                ));
                return violations;
            }
        };

        match (id, value) {
            (ParameterId::ThresholdPercentage, ParameterValue::Real(v)) => {
                check_percentage(v, &mut violations)
            }
            (ParameterId::FuenteDcAmps, ParameterValue::Real(v)) => {
                check_non_negative(id.name(), v, &mut violations)
            }
            (ParameterId::FactorDivider, ParameterValue::Integer(v)) => {
                check_divider(v, &mut violations)
            }
            (_, ParameterValue::Real(v)) => check_positive(id.name(), v, &mut violations),
            _ => {}
        }
        violations
    }

    fn chemistry_warnings(&self, settings: &ChargerSettings) -> Vec<ValidationWarning> {
        let chemistry = settings.chemistry();
        let (min, max) = self.config.voltage_range(chemistry);
        [
            (ParameterId::BulkVoltage, settings.bulk_voltage),
            (ParameterId::AbsorptionVoltage, settings.absorption_voltage),
            (ParameterId::FloatVoltage, settings.float_voltage),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_finite() && (*v < min || *v > max))
        .map(|(id, value)| ValidationWarning::VoltageOutsideChemistryRange {
            field: id.name().to_string(),
            value,
            min,
            max,
            chemistry,
        })
        .collect()
    }
}

// Rule 1
fn check_positive_finite(s: &ChargerSettings, out: &mut Vec<Violation>) {
    for (id, value) in [
        (ParameterId::BatteryCapacity, s.battery_capacity),
        (ParameterId::MaxAllowedCurrent, s.max_allowed_current),
        (ParameterId::BulkVoltage, s.bulk_voltage),
        (ParameterId::AbsorptionVoltage, s.absorption_voltage),
        (ParameterId::FloatVoltage, s.float_voltage),
    ] {
        check_positive(id.name(), value, out);
    }
    check_non_negative(ParameterId::FuenteDcAmps.name(), s.fuente_dc_amps, out);
    check_divider(s.factor_divider, out);
}

fn check_positive(field: &str, value: f64, out: &mut Vec<Violation>) {
    if !value.is_finite() {
        out.push(Violation::new(
            Invariant::PositiveFinite,
            field,
            format!("{} must be a finite number", field),
        ));
    } else if value <= 0.0 {
        out.push(Violation::new(
            Invariant::PositiveFinite,
            field,
            format!("{} must be positive, got {}", field, value),
        ));
    }
}

fn check_non_negative(field: &str, value: f64, out: &mut Vec<Violation>) {
    if !value.is_finite() || value < 0.0 {
        out.push(Violation::new(
            Invariant::PositiveFinite,
            field,
            format!("{} must be a finite, non-negative number, got {}", field, value),
        ));
    }
}

fn check_divider(value: u32, out: &mut Vec<Violation>) {
    if value == 0 {
        out.push(Violation::new(
            Invariant::PositiveFinite,
            ParameterId::FactorDivider.name(),
            "factorDivider must be a positive integer",
        ));
    }
}

// Rule 2
fn check_stage_ordering(s: &ChargerSettings, out: &mut Vec<Violation>) {
    let float_over_absorption = s.float_voltage > s.absorption_voltage;
    if float_over_absorption {
        out.push(Violation::new(
            Invariant::StageOrdering,
            ParameterId::FloatVoltage.name(),
            format!(
                "floatVoltage ({} V) exceeds absorptionVoltage ({} V)",
                s.float_voltage, s.absorption_voltage
            ),
        ));
    }
    if s.absorption_voltage > s.bulk_voltage {
        out.push(Violation::new(
            Invariant::StageOrdering,
            ParameterId::AbsorptionVoltage.name(),
            format!(
                "absorptionVoltage ({} V) exceeds bulkVoltage ({} V)",
                s.absorption_voltage, s.bulk_voltage
            ),
        ));
    }
    if !float_over_absorption && s.float_voltage > s.bulk_voltage {
        out.push(Violation::new(
            Invariant::StageOrdering,
            ParameterId::FloatVoltage.name(),
            format!(
                "floatVoltage ({} V) exceeds bulkVoltage ({} V)",
                s.float_voltage, s.bulk_voltage
            ),
        ));
    }
}

// Rule 3
fn check_threshold_range(s: &ChargerSettings, out: &mut Vec<Violation>) {
    check_percentage(s.threshold_percentage, out);
}

fn check_percentage(value: f64, out: &mut Vec<Violation>) {
    if !(0.0..=100.0).contains(&value) {
        out.push(Violation::new(
            Invariant::ThresholdRange,
            ParameterId::ThresholdPercentage.name(),
            format!("thresholdPercentage must be between 0 and 100, got {}", value),
        ));
    }
}

// Rule 4
fn check_dc_assist(s: &ChargerSettings, out: &mut Vec<Violation>) {
    if !s.use_fuente_dc && s.fuente_dc_amps != 0.0 {
        out.push(Violation::new(
            Invariant::DcAssist,
            ParameterId::FuenteDcAmps.name(),
            format!(
                "fuenteDC_Amps must be 0 when useFuenteDC is false, got {}",
                s.fuente_dc_amps
            ),
        ));
    }
}

// Rule 5
fn check_name(name: &str, out: &mut Vec<Violation>) {
    let reason = if name.is_empty() {
        Some("name cannot be empty".to_string())
    } else if name.chars().count() > MAX_NAME_LEN {
        Some(format!("name is too long (maximum {} characters)", MAX_NAME_LEN))
    } else if name.trim() != name {
        Some("name cannot start or end with whitespace".to_string())
    } else if name == "." || name == ".." {
        Some(format!("'{}' is not a valid name", name))
    } else if name.contains(['/', '\\']) {
        Some("name cannot contain path separators".to_string())
    } else if name.chars().any(char::is_control) {
        Some("name cannot contain control characters".to_string())
    } else {
        None
    };

    if let Some(reason) = reason {
        out.push(Violation::new(Invariant::Name, "name", reason));
    }
}
