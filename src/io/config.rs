use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{WlError, WlResult};
use crate::processing::marker::MarkerSearch;
use crate::processing::scale::MachineScale;

/// Analysis settings. Every field has a default, so a TOML file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Expected BB diameter in mm.
    pub bb_size_mm: f64,
    /// The BB is less attenuating than its surroundings (shows up bright).
    pub low_density_bb: bool,
    /// Skip field detection and use the image center.
    pub open_field: bool,
    /// Convention of the supplied axis readings and of the reported shift.
    pub machine_scale: MachineScale,
    pub search_radius_mm: f64,
    /// BB threshold step as a fraction of the in-field signal range.
    pub threshold_step_fraction: f64,
    /// 51 steps of 2 % cover the in-field range end to end.
    pub max_threshold_iterations: usize,
    /// Source-to-axis distance the pixel scale is referred to.
    pub sad_mm: f64,
    /// Half-width of the crop window around each BB in multi-target mode.
    pub bb_window_mm: f64,
    /// Read axes from the file names instead of the metadata.
    pub use_filenames: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            bb_size_mm: 5.0,
            low_density_bb: false,
            open_field: false,
            machine_scale: MachineScale::Iec61217,
            search_radius_mm: 5.0,
            threshold_step_fraction: 0.02,
            max_threshold_iterations: 51,
            sad_mm: 1000.0,
            bb_window_mm: 20.0,
            use_filenames: false,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> WlResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(WlError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )))
            }
        };
        positive("bb_size_mm", self.bb_size_mm)?;
        positive("search_radius_mm", self.search_radius_mm)?;
        positive("sad_mm", self.sad_mm)?;
        positive("bb_window_mm", self.bb_window_mm)?;
        if !(self.threshold_step_fraction > 0.0 && self.threshold_step_fraction <= 1.0) {
            return Err(WlError::InvalidConfig(format!(
                "threshold_step_fraction must be in (0, 1], got {}",
                self.threshold_step_fraction
            )));
        }
        if self.max_threshold_iterations == 0 {
            return Err(WlError::InvalidConfig(
                "max_threshold_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Marker search parameters for an image with the given pixel scale.
    pub fn marker_search(&self, bb_size_mm: f64, dpmm: f64) -> MarkerSearch {
        MarkerSearch {
            bb_size_mm,
            dpmm,
            low_density: self.low_density_bb,
            search_radius_mm: self.search_radius_mm,
            threshold_step_fraction: self.threshold_step_fraction,
            max_iterations: self.max_threshold_iterations,
        }
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: AnalysisConfig =
            toml::from_str(text).context("failed to parse analysis config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_threshold_iterations, 51);
        assert_eq!(config.machine_scale, MachineScale::Iec61217);
    }

    #[test]
    fn test_partial_toml() {
        let config = AnalysisConfig::from_toml_str(
            "bb_size_mm = 8.0\nlow_density_bb = true\nmachine_scale = \"Varian IEC\"\n",
        )
        .unwrap();
        assert_eq!(config.bb_size_mm, 8.0);
        assert!(config.low_density_bb);
        assert_eq!(config.machine_scale, MachineScale::VarianIec);
        assert_eq!(config.sad_mm, 1000.0);
    }

    #[test]
    fn test_unknown_scale_fails_at_load() {
        let err = AnalysisConfig::from_toml_str("machine_scale = \"elekta\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("elekta"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = AnalysisConfig {
            bb_size_mm: -1.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(WlError::InvalidConfig(_))));
        assert!(AnalysisConfig::from_toml_str("threshold_step_fraction = 0.0\n").is_err());
        assert!(AnalysisConfig::from_toml_str("no_such_key = 1\n").is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = AnalysisConfig {
            open_field: true,
            machine_scale: MachineScale::VarianIec,
            ..AnalysisConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("varian_iec"));
        assert_eq!(AnalysisConfig::from_toml_str(&text).unwrap(), config);
    }
}
