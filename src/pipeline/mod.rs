//! Classification and explanation pipeline.

mod analyze;
mod classify;
mod gradcam;
mod overlay;

pub use analyze::{Analysis, Analyzer, Config};
pub use classify::{predict, Certainty, Label, Prediction};
pub use gradcam::{explain, Heatmap, TargetClass};
pub use overlay::{overlay, DEFAULT_ALPHA};
