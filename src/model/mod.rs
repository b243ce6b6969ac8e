mod loader;
mod registry;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use loader::{
    LoadOutcome, LoadedModel, ModelSource, StoryModel, artifact_slug, load_first_available,
};
pub use registry::ModelRegistry;
pub use types::{Generation, LoadFailure, ModelStatus, StoryRequest, StoryResponse};
