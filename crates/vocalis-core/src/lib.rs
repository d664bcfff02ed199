//! vocalis-core - model lifecycle management
//!
//! Lazily loaded, shared model instances that unload themselves after an
//! idle time-to-live, plus the configuration and logging setup shared by
//! every vocalis crate.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod ttl;
pub mod types;

pub use config::{Config, Family, FamilyConfig, InferenceOptions};
pub use error::LifecycleError;
pub use lifecycle::{LoadFn, ModelLease, ModelState, SelfDisposingModel, UnloadedCallback};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use manager::{LoadedModelInfo, ModelLoader, ModelManager};
pub use ttl::Ttl;
pub use types::*;
