//! Access tokens for device editor tunnels
//!
//! A token authorizes exactly one device to attach exactly one tunnel
//! connection. Issuing a new token for a device replaces the old one,
//! so a token's lifetime is the lifetime of its tunnel.

pub mod store;
pub mod token;

pub use store::TokenStore;
pub use token::{AccessToken, TokenError};
