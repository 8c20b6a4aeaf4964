//! The engine factory.
//!
//! [`ClusterTls`] is built once, from [`Settings`] or as a
//! [`comprehensive`] resource from the command line. Construction does all
//! the work that can fail at startup: provider selection, keystore export,
//! cipher negotiation and building of the immutable rustls contexts. After
//! that, creating an engine only allocates a new connection, so the
//! factory may be shared freely between connection handlers.
//!
//! ```no_run
//! use cluster_tls::{ClusterTls, PeerAddress, Settings};
//!
//! # fn main() -> Result<(), cluster_tls::ClusterTlsError> {
//! let mut settings = Settings::default();
//! settings.transport.keystore.path = Some("node1.p12".into());
//! settings.transport.truststore.path = Some("cluster-trust.p12".into());
//! let tls = ClusterTls::from_settings(&settings)?;
//! let engine = tls.create_transport_client_engine(Some(PeerAddress {
//!     host: "node2.internal".into(),
//!     port: 9300,
//! }))?;
//! # Ok(())
//! # }
//! ```

use comprehensive::v1::{AssemblyRuntime, Resource, resource};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ClientConfig, Resumption, verify_server_cert_signed_by_trust_anchor};
use rustls::crypto::{
    CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
};
use rustls::server::{NoServerSessionStorage, ParsedCertificate, ServerConfig, WebPkiClientVerifier};
use rustls::{ClientConnection, Connection, RootCertStore, ServerConnection};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::ciphers::CipherPolicy;
use crate::config::{Args, NodeRole, Settings, StoreSettings};
use crate::diag::{self, Diagnostics, IdentityReport};
use crate::error::ClusterTlsError;
use crate::keystore::{self, CertificateMaterial, StoreKind, TrustMaterial};
use crate::provider::{
    BoundaryRole, PlatformBackend, ProviderChoice, ProviderSelection, TlsBackend, native_backend,
    select_providers,
};

/// The node an outbound transport connection goes to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerAddress {
    /// Host name or IP address. The peer's certificate must be valid
    /// for it.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// A configured TLS engine for a single connection.
///
/// Feed it the bytes of the connection through [`TlsEngine::connection_mut`]
/// or take the [`Connection`] out with [`TlsEngine::into_connection`].
pub struct TlsEngine {
    role: BoundaryRole,
    need_client_auth: bool,
    peer: Option<PeerAddress>,
    connection: Connection,
}

impl TlsEngine {
    /// Which boundary the engine was made for.
    pub fn role(&self) -> BoundaryRole {
        self.role
    }

    /// Whether this server engine fails the handshake unless the client
    /// presents a trusted certificate. False for client engines.
    pub fn need_client_auth(&self) -> bool {
        self.need_client_auth
    }

    /// The peer the engine is bound to, for outbound transport engines
    /// created with one.
    pub fn peer(&self) -> Option<&PeerAddress> {
        self.peer.as_ref()
    }

    /// Whether the peer certificate is checked against the peer's host
    /// name in addition to the trust anchors.
    pub fn endpoint_identification(&self) -> bool {
        self.peer.is_some()
    }

    /// The underlying rustls connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The underlying rustls connection.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Give up the metadata and keep the connection.
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

impl std::fmt::Debug for TlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsEngine")
            .field("role", &self.role)
            .field("need_client_auth", &self.need_client_auth)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Trusts any certificate that chains to the roots, whatever name it
/// carries. Used for outbound transport connections that have no peer
/// address to check against.
#[derive(Debug)]
struct AnyTrustedPeer {
    roots: Arc<RootCertStore>,
    supported_algs: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AnyTrustedPeer {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.supported_algs.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

struct BoundaryMaterial {
    identity: CertificateMaterial,
    trust: Option<TrustMaterial>,
}

struct HttpContext {
    config: Arc<ServerConfig>,
    need_client_auth: bool,
    _material: BoundaryMaterial,
}

struct TransportContexts {
    server: Arc<ServerConfig>,
    client_by_name: Arc<ClientConfig>,
    client_any_peer: Arc<ClientConfig>,
    _material: BoundaryMaterial,
}

/// Factory of TLS engines for the HTTP and transport boundaries.
pub struct ClusterTls {
    selection: ProviderSelection,
    ciphers: CipherPolicy,
    http: Option<HttpContext>,
    transport: Option<TransportContexts>,
    diagnostics: Diagnostics,
}

fn required_path(
    settings: &Settings,
    store: &StoreSettings,
    kind: StoreKind,
    boundary: &str,
) -> Result<PathBuf, ClusterTlsError> {
    let Some(ref path) = store.path else {
        return Err(ClusterTlsError::Configuration(format!(
            "--tls-{}-{} is required when {} TLS is enabled",
            boundary, kind, boundary
        )));
    };
    let path = settings.resolve_path(path);
    keystore::check_store_file(kind, &path)?;
    Ok(path)
}

fn load_transport(settings: &Settings) -> Result<BoundaryMaterial, ClusterTlsError> {
    let ks = &settings.transport.keystore;
    let ts = &settings.transport.truststore;
    let ks_path = required_path(settings, ks, StoreKind::Keystore, "transport")?;
    let ts_path = required_path(settings, ts, StoreKind::Truststore, "transport")?;
    let identity =
        keystore::materialize(&ks_path, ks.container_type, &ks.password, ks.alias.as_deref())?;
    let trust = keystore::materialize_trust(
        &ts_path,
        ts.container_type,
        &ts.password,
        ts.alias.as_deref(),
    )?;
    Ok(BoundaryMaterial {
        identity,
        trust: Some(trust),
    })
}

fn load_http(settings: &Settings) -> Result<BoundaryMaterial, ClusterTlsError> {
    let ks = &settings.http.keystore;
    let ts = &settings.http.truststore;
    let ks_path = required_path(settings, ks, StoreKind::Keystore, "http")?;
    let ts_path = if settings.enforce_http_client_auth {
        Some(required_path(settings, ts, StoreKind::Truststore, "http")?)
    } else {
        None
    };
    let identity =
        keystore::materialize(&ks_path, ks.container_type, &ks.password, ks.alias.as_deref())?;
    let trust = match ts_path {
        Some(path) => Some(keystore::materialize_trust(
            &path,
            ts.container_type,
            &ts.password,
            ts.alias.as_deref(),
        )?),
        None => None,
    };
    Ok(BoundaryMaterial { identity, trust })
}

fn require_ciphers(policy: &CipherPolicy, any_boundary: bool) -> Result<(), ClusterTlsError> {
    if any_boundary && policy.is_empty() {
        return Err(ClusterTlsError::Configuration(
            "None of the preferred cipher suites is supported by the selected TLS providers"
                .into(),
        ));
    }
    Ok(())
}

fn restricted_provider(
    choice: ProviderChoice,
    policy: &CipherPolicy,
) -> Result<Arc<CryptoProvider>, ClusterTlsError> {
    let backend = choice.backend().ok_or_else(|| {
        ClusterTlsError::Configuration(format!("TLS provider {} has no backend", choice))
    })?;
    Ok(backend.restricted_to(policy))
}

fn server_config(
    provider: Arc<CryptoProvider>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Option<RootCertStore>,
) -> Result<Arc<ServerConfig>, ClusterTlsError> {
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;
    let mut config = match client_roots {
        Some(roots) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(chain, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(chain, key)?,
    };
    config.session_storage = Arc::new(NoServerSessionStorage {});
    config.send_tls13_tickets = 0;
    config.alpn_protocols = Vec::new();
    Ok(Arc::new(config))
}

fn finish_client_config(mut config: ClientConfig) -> Arc<ClientConfig> {
    config.resumption = Resumption::disabled();
    config.alpn_protocols = Vec::new();
    Arc::new(config)
}

fn transport_contexts(
    provider: Arc<CryptoProvider>,
    material: BoundaryMaterial,
) -> Result<TransportContexts, ClusterTlsError> {
    let (chain, key) = material.identity.load()?;
    let trust = material.trust.as_ref().ok_or_else(|| {
        ClusterTlsError::Configuration("no trust material configured for transport".into())
    })?;
    let roots = trust.root_store()?;

    let server = server_config(
        Arc::clone(&provider),
        chain.clone(),
        key.clone_key(),
        Some(roots.clone()),
    )?;

    let client_by_name = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots.clone())
        .with_client_auth_cert(chain.clone(), key.clone_key())?;

    let mut client_any_peer = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyTrustedPeer {
            roots: Arc::new(roots),
            supported_algs: provider.signature_verification_algorithms,
        }))
        .with_client_auth_cert(chain, key)?;
    client_any_peer.enable_sni = false;

    Ok(TransportContexts {
        server,
        client_by_name: finish_client_config(client_by_name),
        client_any_peer: finish_client_config(client_any_peer),
        _material: material,
    })
}

fn http_context(
    provider: Arc<CryptoProvider>,
    material: BoundaryMaterial,
) -> Result<HttpContext, ClusterTlsError> {
    let (chain, key) = material.identity.load()?;
    let client_roots = match material.trust {
        Some(ref trust) => Some(trust.root_store()?),
        None => None,
    };
    let need_client_auth = client_roots.is_some();
    Ok(HttpContext {
        config: server_config(provider, chain, key, client_roots)?,
        need_client_auth,
        _material: material,
    })
}

fn identity_reports(role: BoundaryRole, material: &CertificateMaterial) -> Vec<IdentityReport> {
    let roles: &[BoundaryRole] = match role {
        BoundaryRole::Http => &[BoundaryRole::Http],
        _ => &[BoundaryRole::TransportServer, BoundaryRole::TransportClient],
    };
    match material.load() {
        Ok((chain, _)) => roles
            .iter()
            .filter_map(|r| IdentityReport::new(*r, &chain))
            .collect(),
        Err(e) => {
            log::warn!("Cannot read back the {} identity for diagnostics: {}", role, e);
            Vec::new()
        }
    }
}

impl ClusterTls {
    /// Run the whole initialisation sequence. Any failure is fatal.
    pub fn from_settings(settings: &Settings) -> Result<Self, ClusterTlsError> {
        let selection = select_providers(settings);
        diag::log_selection(&selection);

        // Transport material is validated and loaded before HTTP is looked at.
        let transport_material = if settings.transport.enabled {
            Some(load_transport(settings)?)
        } else {
            None
        };
        let http_material = match (settings.http.enabled, settings.node_role) {
            (true, NodeRole::Node) => Some(load_http(settings)?),
            (true, NodeRole::Client) => {
                log::info!("Not loading HTTP TLS material for a pure client");
                None
            }
            (false, _) => None,
        };

        let native = if selection.uses(ProviderChoice::NativeAccelerated) {
            native_backend()
        } else {
            None
        };
        let platform: Option<&dyn TlsBackend> = if selection.uses(ProviderChoice::PlatformDefault)
        {
            Some(&PlatformBackend)
        } else {
            None
        };
        let ciphers = CipherPolicy::negotiate(native, platform);
        diag::log_cipher_policy(&ciphers);
        diag::warn_weak_ciphers(&ciphers);
        require_ciphers(
            &ciphers,
            transport_material.is_some() || http_material.is_some(),
        )?;

        let mut identities = Vec::new();
        if let Some(ref m) = transport_material {
            identities.extend(identity_reports(BoundaryRole::TransportServer, &m.identity));
        }
        if let Some(ref m) = http_material {
            identities.extend(identity_reports(BoundaryRole::Http, &m.identity));
        }
        let now = OffsetDateTime::now_utc();
        for id in &identities {
            id.check(now);
        }
        #[cfg(feature = "metrics")]
        crate::metrics::update(&identities);

        let transport = match transport_material {
            Some(m) => Some(transport_contexts(
                restricted_provider(selection.transport_server, &ciphers)?,
                m,
            )?),
            None => None,
        };
        let http = match http_material {
            Some(m) => Some(http_context(
                restricted_provider(selection.http, &ciphers)?,
                m,
            )?),
            None => None,
        };

        let diagnostics = Diagnostics {
            selection,
            native: native_backend().map(|b| b.name()),
            ciphers: ciphers.clone(),
            identities,
        };
        Ok(Self {
            selection,
            ciphers,
            http,
            transport,
            diagnostics,
        })
    }

    /// A server engine for one inbound HTTP connection.
    pub fn create_http_engine(&self) -> Result<TlsEngine, ClusterTlsError> {
        let http = self.http.as_ref().ok_or_else(|| {
            ClusterTlsError::Configuration("HTTP TLS is not configured on this process".into())
        })?;
        Ok(TlsEngine {
            role: BoundaryRole::Http,
            need_client_auth: http.need_client_auth,
            peer: None,
            connection: ServerConnection::new(Arc::clone(&http.config))?.into(),
        })
    }

    fn transport(&self) -> Result<&TransportContexts, ClusterTlsError> {
        self.transport.as_ref().ok_or_else(|| {
            ClusterTlsError::Configuration(
                "no trust material configured for transport TLS".into(),
            )
        })
    }

    /// A server engine for one inbound node-to-node connection. The peer
    /// must present a certificate signed by the transport truststore.
    pub fn create_transport_server_engine(&self) -> Result<TlsEngine, ClusterTlsError> {
        let t = self.transport()?;
        Ok(TlsEngine {
            role: BoundaryRole::TransportServer,
            need_client_auth: true,
            peer: None,
            connection: ServerConnection::new(Arc::clone(&t.server))?.into(),
        })
    }

    /// A client engine for one outbound node-to-node connection. With a
    /// peer, the server certificate must also be valid for the peer host.
    pub fn create_transport_client_engine(
        &self,
        peer: Option<PeerAddress>,
    ) -> Result<TlsEngine, ClusterTlsError> {
        let t = self.transport()?;
        let connection = match peer {
            Some(ref p) => {
                let name = ServerName::try_from(p.host.clone()).map_err(|e| {
                    ClusterTlsError::Configuration(format!("Invalid peer host {}: {}", p.host, e))
                })?;
                ClientConnection::new(Arc::clone(&t.client_by_name), name)?
            }
            None => ClientConnection::new(
                Arc::clone(&t.client_any_peer),
                ServerName::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            )?,
        };
        Ok(TlsEngine {
            role: BoundaryRole::TransportClient,
            need_client_auth: false,
            peer,
            connection: connection.into(),
        })
    }

    /// Provider chosen for every boundary.
    pub fn provider_selection(&self) -> ProviderSelection {
        self.selection
    }

    /// Cipher suites shared by all boundaries.
    pub fn cipher_policy(&self) -> &CipherPolicy {
        &self.ciphers
    }

    /// Report of the initialisation decisions.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

#[resource]
impl Resource for ClusterTls {
    const NAME: &str = "Cluster TLS engines";

    fn new(
        _: comprehensive::NoDependencies,
        args: Args,
        _: &mut AssemblyRuntime<'_>,
    ) -> Result<Arc<Self>, ClusterTlsError> {
        Ok(Arc::new(Self::from_settings(&args.into())?))
    }
}
