//! Ensemble model components, model sets and loading

pub mod aggregator;
pub mod component;
pub mod inference;
pub mod loader;
pub mod model_set;

pub use aggregator::EnsembleWeights;
pub use component::{Algorithm, AlgorithmKind, ModelComponent};
pub use inference::{EnsemblePrediction, EnsemblePredictor};
pub use loader::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, ModelLoader};
pub use model_set::{ModelInfo, ModelSet};
