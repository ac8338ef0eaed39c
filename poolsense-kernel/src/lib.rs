//! Braiins Pool polling kernel: API client, refresh coordinator and the
//! sensor surfaces (registry, MQTT discovery, HTTP view) built on its cache.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod http;
pub mod mqtt;
pub mod normalize;
pub mod publisher;
pub mod scheduler;
pub mod sensors;
pub mod state;

pub use api::{Endpoint, PoolApi, PoolApiClient};
pub use coordinator::{CacheSnapshot, CyclePhase, RefreshCoordinator};
pub use error::{PoolApiError, UpdateFailed};
pub use normalize::{NormalizedRecord, PoolData};
