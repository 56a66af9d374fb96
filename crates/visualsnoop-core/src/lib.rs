//! Client for the VisualSnoop image indexing and visual search API.
//! Every request is signed with VSHMAC; see [`auth`].

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod images;
pub mod models;

pub use crate::auth::{Credentials, HmacSigner, SignedRequest};
pub use crate::client::{CollectionClient, CollectionOptions};
pub use crate::config::{Config, DEFAULT_ENDPOINT};
pub use crate::error::{Error, Result};
pub use crate::images::ImageSource;
pub use crate::models::*;
