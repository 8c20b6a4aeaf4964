//! Settings for [`crate::ClusterTls`].
//!
//! # Command line flags
//!
//! | Flag                               | Default    | Meaning |
//! |------------------------------------|------------|---------|
//! | `--tls-http-enabled`               | `false`    | Serve HTTP over TLS |
//! | `--tls-http-prefer-native`         | `true`     | Use the native-accelerated provider for HTTP if available |
//! | `--tls-http-keystore`              | None       | Keystore holding the HTTP server identity |
//! | `--tls-http-keystore-type`         | `pkcs12`   | `pkcs12` or `pem` |
//! | `--tls-http-keystore-password`     | `changeit` | Keystore password |
//! | `--tls-http-keystore-alias`        | None       | Key entry to use; the default entry if unset |
//! | `--tls-http-truststore`            | None       | Trust anchors for HTTP client certificates |
//! | `--tls-http-truststore-type`       | `pkcs12`   | `pkcs12` or `pem` |
//! | `--tls-http-truststore-password`   | `changeit` | Truststore password |
//! | `--tls-http-truststore-alias`      | None       | Only trust this entry |
//! | `--tls-http-enforce-client-auth`   | `false`    | Require HTTP clients to present a certificate |
//! | `--tls-transport-enabled`          | `true`     | Secure node-to-node links |
//! | `--tls-transport-prefer-native`    | `true`     | As for HTTP |
//! | `--tls-transport-keystore[-type,-password,-alias]`   | | As for HTTP, mandatory |
//! | `--tls-transport-truststore[-type,-password,-alias]` | | As for HTTP, mandatory |
//! | `--tls-node-role`                  | `node`     | `client` processes do not serve HTTP |
//! | `--tls-config-dir`                 | None       | Base for relative keystore paths |

use clap::ArgAction;
use std::path::{Path, PathBuf};

const DEFAULT_PASSWORD: &str = "changeit";

/// Format of a keystore or truststore file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum ContainerType {
    /// PKCS#12 archive, as written by `openssl pkcs12 -export` or
    /// `keytool -storetype PKCS12`.
    #[default]
    Pkcs12,
    /// Concatenated PEM blocks. An encrypted private key is decrypted
    /// with the store password.
    Pem,
}

/// What the process does in the cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum NodeRole {
    /// A full node: serves HTTP and joins the transport mesh.
    #[default]
    Node,
    /// A pure client: only makes transport connections, never serves HTTP.
    Client,
}

/// Location and credentials of one keystore or truststore.
#[derive(Clone)]
pub struct StoreSettings {
    /// File to load. Relative paths resolve against
    /// [`Settings::config_dir`].
    pub path: Option<PathBuf>,
    /// How to parse the file.
    pub container_type: ContainerType,
    /// Password protecting the container and the key inside it.
    pub password: String,
    /// Entry to select, or the default entry if `None`.
    pub alias: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            container_type: ContainerType::default(),
            password: DEFAULT_PASSWORD.into(),
            alias: None,
        }
    }
}

impl std::fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSettings")
            .field("path", &self.path)
            .field("container_type", &self.container_type)
            .field("password", &"<redacted>")
            .field("alias", &self.alias)
            .finish()
    }
}

/// Settings shared by both boundaries.
#[derive(Clone, Debug)]
pub struct BoundarySettings {
    /// Whether the boundary uses TLS at all.
    pub enabled: bool,
    /// Use the native-accelerated provider if it is available.
    pub prefer_native: bool,
    /// Our own identity.
    pub keystore: StoreSettings,
    /// Trust anchors for verifying peers.
    pub truststore: StoreSettings,
}

impl BoundarySettings {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            prefer_native: true,
            keystore: StoreSettings::default(),
            truststore: StoreSettings::default(),
        }
    }
}

/// Resolved settings for [`crate::ClusterTls::from_settings`].
///
/// The default value matches the defaults of the command line flags:
/// HTTP TLS off, transport TLS on, no stores configured.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Client-facing HTTP boundary.
    pub http: BoundarySettings,
    /// Require HTTP clients to authenticate with a certificate.
    pub enforce_http_client_auth: bool,
    /// Internal node-to-node transport boundary.
    pub transport: BoundarySettings,
    /// Pure clients load no HTTP server material.
    pub node_role: NodeRole,
    /// Base directory for relative store paths.
    pub config_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: BoundarySettings::new(false),
            enforce_http_client_auth: false,
            transport: BoundarySettings::new(true),
            node_role: NodeRole::default(),
            config_dir: None,
        }
    }
}

impl Settings {
    pub(crate) fn resolve_path(&self, path: &Path) -> PathBuf {
        match self.config_dir {
            Some(ref dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Command line arguments for the [`crate::ClusterTls`] resource.
#[derive(clap::Args, Debug)]
#[group(id = "cluster_tls_args")]
pub struct Args {
    #[arg(long, default_value_t = false, action = ArgAction::Set, help = "Serve HTTP over TLS.")]
    tls_http_enabled: bool,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Use the native-accelerated TLS provider for HTTP when it is available."
    )]
    tls_http_prefer_native: bool,

    #[arg(long, help = "Keystore with the HTTP server certificate and key.")]
    tls_http_keystore: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ContainerType::Pkcs12)]
    tls_http_keystore_type: ContainerType,

    #[arg(long, default_value = DEFAULT_PASSWORD)]
    tls_http_keystore_password: String,

    #[arg(long)]
    tls_http_keystore_alias: Option<String>,

    #[arg(long, help = "Truststore for verifying HTTP client certificates.")]
    tls_http_truststore: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ContainerType::Pkcs12)]
    tls_http_truststore_type: ContainerType,

    #[arg(long, default_value = DEFAULT_PASSWORD)]
    tls_http_truststore_password: String,

    #[arg(long)]
    tls_http_truststore_alias: Option<String>,

    #[arg(
        long,
        default_value_t = false,
        action = ArgAction::Set,
        help = "Require HTTP clients to present a certificate signed by the HTTP truststore."
    )]
    tls_http_enforce_client_auth: bool,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Secure node-to-node transport links with mutual TLS."
    )]
    tls_transport_enabled: bool,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Use the native-accelerated TLS provider for transport when it is available."
    )]
    tls_transport_prefer_native: bool,

    #[arg(long, help = "Keystore with this node's transport certificate and key.")]
    tls_transport_keystore: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ContainerType::Pkcs12)]
    tls_transport_keystore_type: ContainerType,

    #[arg(long, default_value = DEFAULT_PASSWORD)]
    tls_transport_keystore_password: String,

    #[arg(long)]
    tls_transport_keystore_alias: Option<String>,

    #[arg(long, help = "Truststore for verifying other nodes.")]
    tls_transport_truststore: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ContainerType::Pkcs12)]
    tls_transport_truststore_type: ContainerType,

    #[arg(long, default_value = DEFAULT_PASSWORD)]
    tls_transport_truststore_password: String,

    #[arg(long)]
    tls_transport_truststore_alias: Option<String>,

    #[arg(long, value_enum, default_value_t = NodeRole::Node)]
    tls_node_role: NodeRole,

    #[arg(long, help = "Directory against which relative keystore paths are resolved.")]
    tls_config_dir: Option<PathBuf>,
}

impl From<Args> for Settings {
    fn from(a: Args) -> Self {
        Self {
            http: BoundarySettings {
                enabled: a.tls_http_enabled,
                prefer_native: a.tls_http_prefer_native,
                keystore: StoreSettings {
                    path: a.tls_http_keystore,
                    container_type: a.tls_http_keystore_type,
                    password: a.tls_http_keystore_password,
                    alias: a.tls_http_keystore_alias,
                },
                truststore: StoreSettings {
                    path: a.tls_http_truststore,
                    container_type: a.tls_http_truststore_type,
                    password: a.tls_http_truststore_password,
                    alias: a.tls_http_truststore_alias,
                },
            },
            enforce_http_client_auth: a.tls_http_enforce_client_auth,
            transport: BoundarySettings {
                enabled: a.tls_transport_enabled,
                prefer_native: a.tls_transport_prefer_native,
                keystore: StoreSettings {
                    path: a.tls_transport_keystore,
                    container_type: a.tls_transport_keystore_type,
                    password: a.tls_transport_keystore_password,
                    alias: a.tls_transport_keystore_alias,
                },
                truststore: StoreSettings {
                    path: a.tls_transport_truststore,
                    container_type: a.tls_transport_truststore_type,
                    password: a.tls_transport_truststore_password,
                    alias: a.tls_transport_truststore_alias,
                },
            },
            node_role: a.tls_node_role,
            config_dir: a.tls_config_dir,
        }
    }
}
