//! On-disk response cache: index, filesystem store, and the engine that
//! coordinates both under the striped-lock scheme.

pub mod engine;
pub mod index;
pub mod store;

pub use engine::{CacheEngine, FetchResult};
pub use index::Expiry;
