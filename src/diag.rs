//! Diagnostic reporting for [`crate::ClusterTls`].
//!
//! Everything here is for operators: it goes to the log at startup and is
//! kept in a [`Diagnostics`] value which renders the same report on demand.

use rustls_pki_types::CertificateDer;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::ciphers::{CipherPolicy, suite_name};
use crate::provider::{BoundaryRole, ProviderSelection, native_backend, native_unavailability_cause};

const EXPIRY_WARNING_THRESHOLD: time::Duration = time::Duration::days(30);

/// What the native-accelerated provider offers, or why it is missing.
pub fn native_report() -> Vec<String> {
    let Some(backend) = native_backend() else {
        return vec![format!(
            "Native TLS provider not available because {}",
            native_unavailability_cause().unwrap_or("of an unknown reason")
        )];
    };
    let mut lines = vec![format!(
        "Native TLS provider {} available (FIPS: {})",
        backend.name(),
        backend.crypto_provider().fips()
    )];
    lines.push(match backend.supported_cipher_suites() {
        Ok(suites) => format!(
            "Native TLS provider available cipher suites: {}",
            suites.into_iter().map(suite_name).collect::<Vec<_>>().join(", ")
        ),
        Err(e) => format!("Native TLS provider cannot list cipher suites: {}", e),
    });
    lines
}

/// Log [`native_report`].
pub fn log_native_report() {
    for line in native_report() {
        log::info!("{}", line);
    }
}

/// Log the provider chosen for every boundary.
pub fn log_selection(selection: &ProviderSelection) {
    for role in [
        BoundaryRole::TransportClient,
        BoundaryRole::TransportServer,
        BoundaryRole::Http,
    ] {
        log::info!("TLS provider for {}: {}", role, selection.for_role(role));
    }
}

/// Log the negotiated cipher suites.
pub fn log_cipher_policy(policy: &CipherPolicy) {
    log::info!("Enabled TLS cipher suites: {}", policy.enabled().join(", "));
}

/// Warn when strong encryption is not available at runtime. Returns
/// whether a warning was emitted.
pub fn warn_weak_ciphers(policy: &CipherPolicy) -> bool {
    if policy.is_empty() {
        log::error!("AES encryption not supported: no cipher suite is enabled");
        true
    } else if !policy.enabled().iter().any(|name| name.contains("AES_256")) {
        log::warn!(
            "AES 256 not supported by the enabled cipher suites ({}); only 128-bit keys will be negotiated",
            policy.enabled().join(", ")
        );
        true
    } else {
        false
    }
}

/// Facts about one loaded certificate.
#[derive(Clone, Debug)]
pub struct IdentityReport {
    /// Boundary presenting the certificate.
    pub role: BoundaryRole,
    /// Subject distinguished name.
    pub subject: String,
    /// End of the validity period.
    pub not_after: OffsetDateTime,
}

impl IdentityReport {
    /// Parse the end-entity certificate (first in `chain`).
    pub fn new(role: BoundaryRole, chain: &[CertificateDer<'_>]) -> Option<Self> {
        let end_entity = chain.first()?;
        match X509Certificate::from_der(end_entity.as_ref()) {
            Ok((_, cert)) => Some(Self {
                role,
                subject: cert.subject().to_string(),
                not_after: cert.validity().not_after.to_datetime(),
            }),
            Err(e) => {
                log::warn!("Cannot parse the {} certificate for diagnostics: {}", role, e);
                None
            }
        }
    }

    /// Log the identity; warn if it is expired or will expire soon.
    /// Returns whether a warning was emitted.
    pub fn check(&self, now: OffsetDateTime) -> bool {
        let ttl = self.not_after - now;
        if ttl <= time::Duration::ZERO {
            log::warn!(
                "TLS identity {} for {} expired at {}",
                self.subject,
                self.role,
                self.not_after
            );
            true
        } else if ttl < EXPIRY_WARNING_THRESHOLD {
            log::warn!(
                "TLS identity {} for {} expires soon, at {}",
                self.subject,
                self.role,
                self.not_after
            );
            true
        } else {
            log::info!(
                "TLS identity for {} is {}, valid until {}",
                self.role,
                self.subject,
                self.not_after
            );
            false
        }
    }
}

/// Snapshot of every decision made during initialisation.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    /// Provider per boundary.
    pub selection: ProviderSelection,
    /// Name of the native backend, if built in.
    pub native: Option<&'static str>,
    /// Enabled cipher suites.
    pub ciphers: CipherPolicy,
    /// Loaded identities.
    pub identities: Vec<IdentityReport>,
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.native {
            Some(name) => writeln!(f, "native provider: {name}")?,
            None => writeln!(f, "native provider: unavailable")?,
        }
        for role in [
            BoundaryRole::Http,
            BoundaryRole::TransportServer,
            BoundaryRole::TransportClient,
        ] {
            writeln!(f, "{}: {}", role, self.selection.for_role(role))?;
        }
        writeln!(f, "cipher suites: {}", self.ciphers.enabled().join(", "))?;
        for id in &self.identities {
            writeln!(f, "{} identity: {} (valid until {})", id.role, id.subject, id.not_after)?;
        }
        Ok(())
    }
}
