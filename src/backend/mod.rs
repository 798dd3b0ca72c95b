//! Hosted store access: REST client, domain rows, and the cached repository.

pub mod api_types;
pub mod cache;
mod cached_client;
mod client;
pub mod types;

pub use cache::{detail_key, ListQuery};
pub use cached_client::CachedBackend;
pub use client::RestClient;
pub use types::{Account, Collection, Entity, Role, Space, User};
