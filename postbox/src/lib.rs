pub use postbox_macros::HttpError;

pub mod auth;
pub mod campaigns;
pub mod config;
pub mod crypto;
pub mod enrich;
pub mod error;
pub mod mail;
pub mod models;
pub mod queue;
pub mod routes;
pub mod routing;
pub mod serve;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracking;

pub use config::{EnvConfig, Settings};
pub use serve::serve;
