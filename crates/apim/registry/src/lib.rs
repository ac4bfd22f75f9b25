//! APIM Registry - Key-prefix registry over watched key-value stores
//!
//! Micro-gateways watch a key-value store and apply whatever documents appear
//! under their namespace. This crate provides:
//!
//! - **KvStore**: minimal store contract (get/put/delete/range)
//! - **InMemoryKvStore**: watched in-memory store for development and tests
//! - **EtcdKvStore**: etcd v3 through its JSON gateway
//! - **Registry**: namespaced view over a store with convergent sync
//!
//! ## Key layout
//!
//! `{key_prefix}{kind}/{id}`, where the prefix always ends with `/` so a
//! prefix scan can never match a sibling namespace sharing a leading string.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod etcd;
pub mod key;
pub mod memory;
pub mod registry;
pub mod store;

// Re-exports
pub use error::{RegistryError, Result, StoreError};
pub use etcd::{EtcdConnector, EtcdKvStore};
pub use key::KeyPrefix;
pub use memory::{InMemoryConnector, InMemoryKvStore};
pub use registry::{KvRegistry, Registry};
pub use store::{KeyValue, KvConnector, KvStore, WatchEvent};
