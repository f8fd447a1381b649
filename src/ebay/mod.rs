pub mod auth;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod inventory;
pub mod token_blob;

pub use auth::OAuthClient;
pub use config::EbayConfig;
pub use gateway::Gateway;
