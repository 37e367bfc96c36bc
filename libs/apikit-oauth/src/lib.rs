#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! `OAuth2` bearer tokens for `apikit`
//!
//! A [`TokenProvider`] acquires tokens from a token endpoint with the
//! client credentials or password grant, caches them in a shared
//! [`TokenCache`] until shortly before they expire and renews them with the
//! refresh grant when possible. Concurrent callers of one key share a single
//! fetch.
//!
//! [`OAuthTokenFilter`] plugs a provider into the `apikit` pipeline.
//!
//! # Example
//!
//! ```ignore
//! use apikit_oauth::{CredentialsOptions, OAuthTokenFilter, TokenProviderFactory};
//!
//! let factory = TokenProviderFactory::new(transport.clone());
//! factory.register(
//!     "billing",
//!     CredentialsOptions::client_credentials(token_url, "billing-client", secret),
//! )?;
//!
//! let client = ApiClient::builder(options)
//!     .shared_transport(transport)
//!     .global_filter(OAuthTokenFilter::new(factory.create("billing", None)?))
//!     .action(list_invoices)
//!     .build()?;
//! ```

mod behavior;
mod cache;
mod config;
mod endpoint;
mod error;
mod factory;
mod provider;
mod types;

pub use behavior::{OAuthTokenFilter, TOKEN_FILTER_PRIORITY};
pub use cache::TokenCache;
pub use config::{ClientAuthMethod, CredentialsOptions, GrantOptions};
pub use error::TokenError;
pub use factory::TokenProviderFactory;
pub use provider::TokenProvider;
pub use types::{AccessToken, TokenKey};
