//! TLS engines for a clustered server process.
//!
//! A node has two independent TLS boundaries: the client-facing HTTP
//! server and the node-to-node transport, which always uses mutual TLS.
//! [`ClusterTls`] turns the keystores and truststores named in its
//! [`Settings`] into immutable rustls contexts once at startup, choosing
//! for each boundary between the native-accelerated provider (`aws-lc-rs`,
//! feature **native**) and the platform default, and restricting both to
//! one negotiated set of cipher suites. Connection handlers then ask it for
//! a fresh [`TlsEngine`] per connection.
//!
//! [`ClusterTls`] is a [`comprehensive::Resource`], configured from the
//! command line flags listed in [`config`], and can also be built directly
//! with [`ClusterTls::from_settings`].

#![warn(missing_docs)]
// Would impose a requirement for rustc 1.88
// https://github.com/rust-lang/rust/pull/132833
#![allow(clippy::collapsible_if)]

pub mod ciphers;
pub mod config;
pub mod diag;
pub mod error;
pub mod factory;
pub mod keystore;
#[cfg(feature = "metrics")]
mod metrics;
pub mod provider;
#[cfg(test)]
mod testdata;

pub use ciphers::CipherPolicy;
pub use config::{ContainerType, NodeRole, Settings};
pub use error::ClusterTlsError;
pub use factory::{ClusterTls, PeerAddress, TlsEngine};
pub use provider::{BoundaryRole, ProviderChoice, ProviderSelection};
