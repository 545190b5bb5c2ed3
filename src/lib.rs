//! Winston-Lutz isocenter analysis for radiotherapy linacs.
//!
//! Each projection image shows a radiation field and a radio-opaque BB. The
//! crate locates both, backprojects every beam axis into room space and
//! reports how far the mechanical axes (gantry, collimator, couch) deviate
//! from a common isocenter, plus the couch shift that centers the BB.
pub mod entry;
pub mod error;
pub mod io;
pub mod processing;
mod utils;

#[cfg(feature = "python")]
mod binding;

pub use entry::{run_analysis, run_analysis_from_files, run_multi_target_from_files};
pub use error::{WlError, WlResult};
pub use io::config::AnalysisConfig;
pub use io::input::{AxisMapping, AxisReading, PixelGrid, ProjectionImage};
pub use processing::analysis::{Metric, WinstonLutz, WinstonLutzResult};
pub use processing::arrangement::{analyze_multi_target, BbArrangement, BbConfig, MultiTargetResult};
pub use processing::classify::{AxisGroup, ImageClass};
pub use processing::scale::MachineScale;
pub use processing::shift::{CouchCoordinates, ShiftInstruction};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn wlcore(m: &Bound<'_, PyModule>) -> PyResult<()> {
    use binding::classes::{
        PyBbDetection, PyImageResult, PyIsocenter, PyMultiTargetResult, PyProjectionImage,
        PyWinstonLutzResult,
    };

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add_function(wrap_pyfunction!(binding::analyze, m)?)?;
    m.add_function(wrap_pyfunction!(binding::analyze_files, m)?)?;
    m.add_function(wrap_pyfunction!(binding::analyze_multi_target_files, m)?)?;

    m.add_class::<PyProjectionImage>()?;
    m.add_class::<PyImageResult>()?;
    m.add_class::<PyIsocenter>()?;
    m.add_class::<PyWinstonLutzResult>()?;
    m.add_class::<PyBbDetection>()?;
    m.add_class::<PyMultiTargetResult>()?;
    Ok(())
}
