//! Retrofits modern CSS onto pages rendered by older browser engines.
//!
//! The crate parses an HTML page into a small DOM, enumerates its stylesheets
//! the way an engine would expose them through the CSSOM, and rewrites the
//! constructs the target engine does not understand: cascade layers, `oklch()`
//! colors, Level-4 media query ranges and dynamic viewport units.

pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod parser;
pub mod retro_generate;
pub mod style;
pub mod transform;

pub use config::RetrocssConfig;
pub use engine::capabilities::{EngineVersion, PlatformCapabilities};
pub use engine::loader::{FetchError, Fetcher, HttpFetcher, RequestMode, StaticFetcher};
pub use engine::retrofit::{PassStats, Retrofitter};
pub use error::RetrocssError;
pub use transform::Transform;
