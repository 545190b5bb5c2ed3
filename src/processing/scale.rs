//! Machine scale conventions.
//!
//! All geometry downstream of this module works in IEC 61217. A reading or a
//! vector only changes convention here.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WlError;
use crate::io::input::AxisReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MachineScale {
    /// IEC 61217; the canonical convention.
    #[default]
    Iec61217,
    /// Varian IEC: couch rotation runs the opposite sense to IEC 61217.
    VarianIec,
}

impl MachineScale {
    pub fn to_canonical(self, reading: AxisReading) -> AxisReading {
        match self {
            MachineScale::Iec61217 => reading,
            MachineScale::VarianIec => AxisReading {
                couch: mirror_360(reading.couch),
                ..reading
            },
        }
    }

    pub fn from_canonical(self, reading: AxisReading) -> AxisReading {
        match self {
            MachineScale::Iec61217 => reading,
            // the mirror is its own inverse
            MachineScale::VarianIec => AxisReading {
                couch: mirror_360(reading.couch),
                ..reading
            },
        }
    }

    /// Both conventions share the IEC 61217 room axes.
    pub fn vector_to_canonical(self, v: Vector3<f64>) -> Vector3<f64> {
        match self {
            MachineScale::Iec61217 | MachineScale::VarianIec => v,
        }
    }

    pub fn vector_from_canonical(self, v: Vector3<f64>) -> Vector3<f64> {
        match self {
            MachineScale::Iec61217 | MachineScale::VarianIec => v,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MachineScale::Iec61217 => "iec61217",
            MachineScale::VarianIec => "varian_iec",
        }
    }
}

fn mirror_360(angle: f64) -> f64 {
    (360.0 - angle).rem_euclid(360.0)
}

impl fmt::Display for MachineScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MachineScale {
    type Err = WlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "iec61217" | "iec_61217" | "iec" => Ok(MachineScale::Iec61217),
            "varian_iec" | "varianiec" => Ok(MachineScale::VarianIec),
            _ => Err(WlError::InvalidScale(s.to_string())),
        }
    }
}

impl TryFrom<String> for MachineScale {
    type Error = WlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MachineScale> for String {
    fn from(scale: MachineScale) -> Self {
        scale.name().to_string()
    }
}
