use serde::{Deserialize, Serialize};
use std::fmt;

use crate::io::input::AxisReading;

/// Which mechanical axes were varied for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageClass {
    Reference,
    Gantry,
    Collimator,
    Couch,
    GbCombo,
    GbpCombo,
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ImageClass::Reference => "Reference",
                ImageClass::Gantry => "Gantry",
                ImageClass::Collimator => "Collimator",
                ImageClass::Couch => "Couch",
                ImageClass::GbCombo => "GB Combo",
                ImageClass::GbpCombo => "GBP Combo",
            }
        )
    }
}

/// Buckets a canonical, normalized reading. Comparisons are exact.
pub fn classify(gantry: f64, collimator: f64, couch: f64) -> ImageClass {
    let g = gantry != 0.0;
    let c = collimator != 0.0;
    let p = couch != 0.0;
    match (g, c, p) {
        (false, false, false) => ImageClass::Reference,
        (true, false, false) => ImageClass::Gantry,
        (false, true, false) => ImageClass::Collimator,
        (false, false, true) => ImageClass::Couch,
        (_, _, false) => ImageClass::GbCombo,
        (_, _, true) => ImageClass::GbpCombo,
    }
}

pub fn classify_reading(reading: &AxisReading) -> ImageClass {
    classify(reading.gantry, reading.collimator, reading.couch)
}

/// The image sets isocenter metrics are computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisGroup {
    Gantry,
    GantryCollimator,
    Collimator,
    Couch,
    Epid,
}

impl AxisGroup {
    pub const ALL: [AxisGroup; 5] = [
        AxisGroup::Gantry,
        AxisGroup::GantryCollimator,
        AxisGroup::Collimator,
        AxisGroup::Couch,
        AxisGroup::Epid,
    ];

    /// The Reference image is the zero point of every sweep and belongs to
    /// each group. The EPID group takes every image with the couch at 0.
    pub fn contains(self, class: ImageClass) -> bool {
        use ImageClass::*;
        match self {
            AxisGroup::Gantry => matches!(class, Reference | Gantry | GbCombo),
            AxisGroup::GantryCollimator => {
                matches!(class, Reference | Gantry | Collimator | GbCombo)
            }
            AxisGroup::Collimator => matches!(class, Reference | Collimator),
            AxisGroup::Couch => matches!(class, Reference | Couch),
            AxisGroup::Epid => !matches!(class, Couch | GbpCombo),
        }
    }
}

impl fmt::Display for AxisGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AxisGroup::Gantry => "Gantry",
                AxisGroup::GantryCollimator => "Gantry+Collimator",
                AxisGroup::Collimator => "Collimator",
                AxisGroup::Couch => "Couch",
                AxisGroup::Epid => "EPID",
            }
        )
    }
}
