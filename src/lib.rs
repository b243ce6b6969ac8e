pub mod config;
pub mod error;
pub mod genre;
pub mod model;
pub mod sampling;
pub mod server;
mod ui;

pub use config::AppConfig;
pub use genre::{Genre, assemble_prompt};
pub use model::{LoadOutcome, ModelRegistry, StoryRequest, StoryResponse};
pub use sampling::SamplingConfig;
pub use server::build_router;
