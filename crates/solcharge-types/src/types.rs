//! Core types for charger configuration data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Battery chemistry family.
///
/// The charger only distinguishes lithium packs from the lead-acid family
/// (flooded, AGM, GEL). The chemistry decides which voltage ranges are
/// typical for the charging stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Chemistry {
    /// Lithium (LiFePO4 and similar).
    Lithium,
    /// Lead-acid family (flooded, AGM, GEL).
    LeadAcid,
}

impl Chemistry {
    /// Map the device's `isLithium` flag to a chemistry.
    #[must_use]
    pub fn from_is_lithium(is_lithium: bool) -> Self {
        if is_lithium {
            Chemistry::Lithium
        } else {
            Chemistry::LeadAcid
        }
    }

    /// Short lowercase label, as used in listings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Chemistry::Lithium => "lithium",
            Chemistry::LeadAcid => "lead-acid",
        }
    }
}

impl fmt::Display for Chemistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete set of charger parameters.
///
/// Field names serialize to the names the device API uses
/// (`batteryCapacity`, `useFuenteDC`, `fuenteDC_Amps`, ...). Unknown fields in
/// incoming JSON, such as client-supplied `createdAt`, are ignored.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ChargerSettings {
    /// Battery bank capacity in Ah.
    pub battery_capacity: f64,
    /// Chemistry flag.
    pub is_lithium: bool,
    /// Charge termination threshold, percent of capacity.
    pub threshold_percentage: f64,
    /// Charge current limit (mA).
    pub max_allowed_current: f64,
    /// Bulk stage voltage setpoint (V).
    pub bulk_voltage: f64,
    /// Absorption stage voltage setpoint (V).
    pub absorption_voltage: f64,
    /// Float stage voltage setpoint (V).
    pub float_voltage: f64,
    /// Whether the auxiliary DC supply assists charging.
    #[cfg_attr(feature = "serde", serde(rename = "useFuenteDC"))]
    pub use_fuente_dc: bool,
    /// Current drawn from the auxiliary DC supply (A).
    #[cfg_attr(feature = "serde", serde(rename = "fuenteDC_Amps"))]
    pub fuente_dc_amps: f64,
    /// Current sensor scaling factor.
    pub factor_divider: u32,
}

impl ChargerSettings {
    /// The chemistry selected by `is_lithium`.
    #[must_use]
    pub fn chemistry(&self) -> Chemistry {
        Chemistry::from_is_lithium(self.is_lithium)
    }
}

impl Default for ChargerSettings {
    /// Factory profile of the controller: 12 V lead-acid bank, 100 Ah.
    fn default() -> Self {
        Self {
            battery_capacity: 100.0,
            is_lithium: false,
            threshold_percentage: 10.0,
            max_allowed_current: 10000.0,
            bulk_voltage: 14.4,
            absorption_voltage: 14.4,
            float_voltage: 13.6,
            use_fuente_dc: false,
            fuente_dc_amps: 0.0,
            factor_divider: 1,
        }
    }
}
