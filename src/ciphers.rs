//! The process-wide set of enabled cipher suites.
//!
//! One list is computed at startup and shared by every boundary, whichever
//! provider services it. It starts from [`PREFERRED_CIPHER_SUITES`] and is
//! narrowed to what the providers in use can actually negotiate.

use rustls::CipherSuite;
use std::collections::HashSet;

use crate::provider::TlsBackend;

/// Curated preference list. Forward-secret key exchange only, AES in GCM
/// or CBC mode, SHA-256/384.
pub const PREFERRED_CIPHER_SUITES: &[&str] = &[
    "TLS13_AES_256_GCM_SHA384",
    "TLS13_AES_128_GCM_SHA256",
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
    "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA384",
    "TLS_DHE_RSA_WITH_AES_256_GCM_SHA384",
    "TLS_DHE_RSA_WITH_AES_128_GCM_SHA256",
];

/// IANA name of a suite as used in [`PREFERRED_CIPHER_SUITES`].
pub fn suite_name(suite: CipherSuite) -> String {
    format!("{:?}", suite)
}

fn supported_names(backend: &dyn TlsBackend) -> Result<HashSet<String>, rustls::Error> {
    Ok(backend
        .supported_cipher_suites()?
        .into_iter()
        .map(suite_name)
        .collect())
}

/// Enabled cipher suites, in order of preference. Immutable once built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CipherPolicy {
    enabled: Vec<&'static str>,
}

impl CipherPolicy {
    /// Narrow [`PREFERRED_CIPHER_SUITES`] for the backends in use. Pass
    /// `None` for a backend that no boundary uses.
    pub fn negotiate(
        native: Option<&dyn TlsBackend>,
        platform: Option<&dyn TlsBackend>,
    ) -> Self {
        Self::negotiate_from(PREFERRED_CIPHER_SUITES, native, platform)
    }

    /// As [`CipherPolicy::negotiate`] with a caller-supplied preference list.
    pub fn negotiate_from(
        preferences: &[&'static str],
        native: Option<&dyn TlsBackend>,
        platform: Option<&dyn TlsBackend>,
    ) -> Self {
        let mut enabled = Vec::with_capacity(preferences.len());
        for name in preferences {
            if !enabled.contains(name) {
                enabled.push(*name);
            }
        }

        if let Some(native) = native {
            match supported_names(native) {
                Ok(available) => enabled.retain(|name| available.contains(*name)),
                Err(e) => {
                    log::error!(
                        "{} reports no usable cipher suites: {}",
                        native.name(),
                        e
                    );
                    enabled.clear();
                }
            }
        }

        if let Some(platform) = platform {
            match supported_names(platform) {
                Ok(supported) => enabled.retain(|name| supported.contains(*name)),
                // Enumeration is diagnostic only; keep what we have.
                Err(e) => log::error!(
                    "Error detecting supported cipher suites for {}: {}",
                    platform.name(),
                    e
                ),
            }
        }

        if enabled.is_empty() {
            log::warn!("No cipher suite from the preference list is supported");
        }
        Self { enabled }
    }

    /// Names of the enabled suites, most preferred first.
    pub fn enabled(&self) -> &[&'static str] {
        &self.enabled
    }

    /// Whether nothing survived negotiation.
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Whether `suite` is enabled.
    pub fn allows(&self, suite: CipherSuite) -> bool {
        self.rank(suite) < self.enabled.len()
    }

    /// Position in order of preference; disabled suites sort last.
    pub(crate) fn rank(&self, suite: CipherSuite) -> usize {
        let name = suite_name(suite);
        self.enabled
            .iter()
            .position(|e| *e == name)
            .unwrap_or(self.enabled.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PlatformBackend;
    use rustls::SupportedCipherSuite;
    use rustls::crypto::CryptoProvider;
    use std::sync::Arc;

    /// Backend whose suite query fails, the way a provider with no usable
    /// protocol version would.
    struct BrokenBackend;

    impl TlsBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn crypto_provider(&self) -> Arc<CryptoProvider> {
            Arc::new(CryptoProvider {
                cipher_suites: Vec::new(),
                ..rustls::crypto::ring::default_provider()
            })
        }
    }

    /// Backend restricted to the TLS 1.3 suites.
    struct Tls13Only;

    impl TlsBackend for Tls13Only {
        fn name(&self) -> &'static str {
            "tls13"
        }

        fn crypto_provider(&self) -> Arc<CryptoProvider> {
            Arc::new(CryptoProvider {
                cipher_suites: rustls::crypto::ring::DEFAULT_CIPHER_SUITES
                    .iter()
                    .copied()
                    .filter(|s| matches!(s, SupportedCipherSuite::Tls13(_)))
                    .collect(),
                ..rustls::crypto::ring::default_provider()
            })
        }
    }

    fn is_subset(policy: &CipherPolicy) -> bool {
        policy
            .enabled()
            .iter()
            .all(|name| PREFERRED_CIPHER_SUITES.contains(name))
    }

    #[test]
    fn no_providers_keeps_preferences() {
        let p = CipherPolicy::negotiate(None, None);
        assert_eq!(p.enabled(), PREFERRED_CIPHER_SUITES);
    }

    #[test]
    fn platform_narrows() {
        let p = CipherPolicy::negotiate(None, Some(&PlatformBackend));
        assert!(is_subset(&p));
        assert!(!p.is_empty());
        // No DHE in rustls.
        assert!(!p.enabled().contains(&"TLS_DHE_RSA_WITH_AES_256_GCM_SHA384"));
        assert!(p.enabled().contains(&"TLS13_AES_256_GCM_SHA384"));
        assert!(p.allows(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256));
        assert!(!p.allows(CipherSuite::TLS13_CHACHA20_POLY1305_SHA256));
    }

    #[test]
    fn preference_order_is_kept() {
        let p = CipherPolicy::negotiate(None, Some(&PlatformBackend));
        let positions = p
            .enabled()
            .iter()
            .map(|name| PREFERRED_CIPHER_SUITES.iter().position(|x| x == name))
            .collect::<Vec<_>>();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn native_and_platform_intersect() {
        let p = CipherPolicy::negotiate(Some(&Tls13Only), Some(&PlatformBackend));
        assert_eq!(
            p.enabled(),
            &["TLS13_AES_256_GCM_SHA384", "TLS13_AES_128_GCM_SHA256"]
        );
    }

    #[test]
    fn platform_query_failure_is_absorbed() {
        let p = CipherPolicy::negotiate(Some(&Tls13Only), Some(&BrokenBackend));
        assert_eq!(
            p.enabled(),
            &["TLS13_AES_256_GCM_SHA384", "TLS13_AES_128_GCM_SHA256"]
        );
    }

    #[test]
    fn native_query_failure_empties() {
        let p = CipherPolicy::negotiate(Some(&BrokenBackend), None);
        assert!(p.is_empty());
        assert!(is_subset(&p));
    }

    #[test]
    fn duplicates_collapse() {
        let p = CipherPolicy::negotiate_from(
            &["TLS13_AES_128_GCM_SHA256", "TLS13_AES_128_GCM_SHA256"],
            None,
            None,
        );
        assert_eq!(p.enabled(), &["TLS13_AES_128_GCM_SHA256"]);
        assert_eq!(p.rank(CipherSuite::TLS13_AES_256_GCM_SHA384), 1);
    }
}
