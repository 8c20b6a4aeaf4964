//! Choice of the [`rustls`] crypto backend for each TLS boundary.
//!
//! Two backends exist. The native-accelerated one is `aws-lc-rs`, only
//! present when the crate is built with the **native** feature. The
//! platform one is the process-global default [`CryptoProvider`] if one has
//! been installed, otherwise `ring`.

use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, ServerConfig};
use std::sync::Arc;

use crate::ciphers::CipherPolicy;
use crate::config::Settings;

/// Which backend services a boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderChoice {
    /// Backed by a native cryptography library.
    NativeAccelerated,
    /// The platform's default provider.
    PlatformDefault,
    /// TLS is off for this boundary.
    Disabled,
}

impl ProviderChoice {
    /// The backend implementing this choice, if there is one.
    pub fn backend(self) -> Option<&'static dyn TlsBackend> {
        match self {
            Self::NativeAccelerated => native_backend(),
            Self::PlatformDefault => Some(&PlatformBackend),
            Self::Disabled => None,
        }
    }
}

impl std::fmt::Display for ProviderChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NativeAccelerated => "native-accelerated",
            Self::PlatformDefault => "platform default",
            Self::Disabled => "disabled",
        })
    }
}

/// The three logically independent TLS-protected links.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BoundaryRole {
    /// Client-facing HTTP server.
    Http,
    /// Accepting connections from other nodes.
    TransportServer,
    /// Initiating connections to other nodes.
    TransportClient,
}

impl std::fmt::Display for BoundaryRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::TransportServer => "transport server",
            Self::TransportClient => "transport client",
        })
    }
}

/// Outcome of provider selection for every boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProviderSelection {
    /// HTTP server.
    pub http: ProviderChoice,
    /// Transport server. Always equal to `transport_client`.
    pub transport_server: ProviderChoice,
    /// Transport client.
    pub transport_client: ProviderChoice,
}

impl ProviderSelection {
    /// Choice for one boundary.
    pub fn for_role(&self, role: BoundaryRole) -> ProviderChoice {
        match role {
            BoundaryRole::Http => self.http,
            BoundaryRole::TransportServer => self.transport_server,
            BoundaryRole::TransportClient => self.transport_client,
        }
    }

    /// Whether any boundary uses `choice`.
    pub fn uses(&self, choice: ProviderChoice) -> bool {
        [self.http, self.transport_server, self.transport_client].contains(&choice)
    }
}

/// Capability interface over the backends.
pub trait TlsBackend: Send + Sync {
    /// Short human-readable name.
    fn name(&self) -> &'static str;

    /// The unrestricted provider.
    fn crypto_provider(&self) -> Arc<CryptoProvider>;

    /// Ask which cipher suites the backend can negotiate. This builds
    /// a throwaway server configuration so that a backend which cannot
    /// be used at all reports an error instead of a list.
    fn supported_cipher_suites(&self) -> Result<Vec<CipherSuite>, rustls::Error> {
        let provider = self.crypto_provider();
        let _ = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;
        Ok(provider.cipher_suites.iter().map(|s| s.suite()).collect())
    }

    /// The provider used to build engines: only the suites allowed by
    /// `policy`, in the policy's order of preference.
    fn restricted_to(&self, policy: &CipherPolicy) -> Arc<CryptoProvider> {
        let base = self.crypto_provider();
        let mut cipher_suites = base
            .cipher_suites
            .iter()
            .copied()
            .filter(|s| policy.allows(s.suite()))
            .collect::<Vec<_>>();
        cipher_suites.sort_by_key(|s| policy.rank(s.suite()));
        Arc::new(CryptoProvider {
            cipher_suites,
            ..CryptoProvider::clone(&base)
        })
    }
}

/// `aws-lc-rs`.
#[cfg(feature = "native")]
pub struct NativeBackend;

#[cfg(feature = "native")]
impl TlsBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "aws-lc-rs"
    }

    fn crypto_provider(&self) -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
}

/// The process default provider, falling back to `ring`.
pub struct PlatformBackend;

impl TlsBackend for PlatformBackend {
    fn name(&self) -> &'static str {
        if CryptoProvider::get_default().is_some() {
            "process default"
        } else {
            "ring"
        }
    }

    fn crypto_provider(&self) -> Arc<CryptoProvider> {
        CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
    }
}

/// The native-accelerated backend if this build has one.
pub fn native_backend() -> Option<&'static dyn TlsBackend> {
    #[cfg(feature = "native")]
    {
        Some(&NativeBackend)
    }
    #[cfg(not(feature = "native"))]
    {
        None
    }
}

/// Why [`native_backend`] returns `None`.
pub fn native_unavailability_cause() -> Option<&'static str> {
    if native_backend().is_some() {
        None
    } else {
        Some("built without the \"native\" feature")
    }
}

fn choose(boundary: &str, enabled: bool, prefer_native: bool) -> ProviderChoice {
    if !enabled {
        return ProviderChoice::Disabled;
    }
    if prefer_native {
        crate::diag::log_native_report();
        if native_backend().is_some() {
            return ProviderChoice::NativeAccelerated;
        }
        log::info!("Native TLS provider unavailable for {boundary}, using the platform provider");
    }
    ProviderChoice::PlatformDefault
}

/// Select the provider of every boundary. Never fails: a missing native
/// backend degrades to the platform one.
pub fn select_providers(settings: &Settings) -> ProviderSelection {
    let http = choose("http", settings.http.enabled, settings.http.prefer_native);
    // Client and server share one stack so that node-to-node links
    // always negotiate with the same implementation on both ends.
    let transport = choose(
        "transport",
        settings.transport.enabled,
        settings.transport.prefer_native,
    );
    ProviderSelection {
        http,
        transport_server: transport,
        transport_client: transport,
    }
}
