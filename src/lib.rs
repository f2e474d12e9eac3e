pub mod access_log;
pub mod admission;
pub mod backend;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod functions;
pub mod gateway;
pub mod health;
pub mod policy;
pub mod policy_store;
pub mod policy_validator;
pub mod quota;
pub mod rate_state;
pub mod response;
pub mod router;
pub mod server;
pub mod throttler;
pub mod token_bucket;
pub mod user_service;

pub use config::Config;
pub use error::{ConfigError, ErrorType, GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewaySettings};
pub use policy_store::PolicyStore;
pub use server::create_app;
