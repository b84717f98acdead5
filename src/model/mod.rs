//! Model representation and loading.

pub mod layers;
mod loader;
mod sequential;

pub use layers::{Activation, Feature, Layer, Padding};
pub use loader::{load_model, MANIFEST_FILE, WEIGHTS_FILE};
pub use sequential::{ForwardTrace, Model};
