//! Model discovery, hub cache and downloads for vocalis
//!
//! Every model family is served by a [`HubRegistry`] describing itself
//! through [`ModelFamily`], paired with a lifecycle manager in a
//! [`FamilyExecutor`].

pub mod cache;
pub mod card;
pub mod catalog;
pub mod download;
pub mod error;
pub mod executor;
pub mod filter;
pub mod hub;
pub mod registry;
pub mod weights;

pub use cache::{CachedRepo, HubCache};
pub use card::ModelCard;
pub use catalog::{CatalogClient, ModelStream, RemoteModel};
pub use download::{AuxiliaryAsset, DownloadStatus};
pub use error::ModelError;
pub use executor::FamilyExecutor;
pub use filter::ModelFilter;
pub use hub::HubRegistry;
pub use registry::{find_file, require_file, ModelFamily, ModelRegistry};
pub use weights::{read_json, MappedWeights};
