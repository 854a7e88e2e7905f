pub mod algorithms;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod glob;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod registry;
pub mod response;
pub mod server;
pub mod store;
pub mod validation;

pub use algorithms::{RateLimitAlgorithm, RateLimitDecision};
pub use config::{Config, StoreBackend, StoreConfig};
pub use error::{Result, StoreError};
pub use rate_limit_config::{Algorithm, RateLimitConfig};
pub use rate_limiter::RateLimiter;
pub use server::create_app;
pub use store::{create_store, KvStore, MemoryStore, RedisStore, SetOptions};
