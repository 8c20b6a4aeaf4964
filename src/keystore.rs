//! Conversion of keystore and truststore containers into PEM files.
//!
//! A container is opened once with its password. The selected chain and
//! its private key are written to private temporary files which live as
//! long as the returned material; [`CertificateMaterial::load`] and
//! [`TrustMaterial::load`] read them back the way any PEM consumer would.

use openssl::pkey::{PKey, Private};
use openssl::x509::{X509, X509Ref, X509VerifyResult};
use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::config::ContainerType;
use crate::error::ClusterTlsError;

/// Which kind of container a path is supposed to hold.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreKind {
    /// Identity: certificate chain and private key.
    Keystore,
    /// Trust anchors.
    Truststore,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Keystore => "keystore",
            Self::Truststore => "truststore",
        })
    }
}

/// Fail unless `path` is a readable regular file. Nothing is parsed.
pub fn check_store_file(kind: StoreKind, path: &Path) -> Result<(), ClusterTlsError> {
    let usable = match std::fs::metadata(path) {
        Ok(md) => !md.is_dir() && File::open(path).is_ok(),
        Err(_) => false,
    };
    if usable {
        Ok(())
    } else {
        Err(ClusterTlsError::Configuration(format!(
            "No such {} file {}",
            kind,
            path.display()
        )))
    }
}

/// A private key with the certificates stored alongside it.
struct KeyEntry {
    alias: Option<String>,
    key: PKey<Private>,
    certs: Vec<X509>,
}

/// Every entry of an opened container. PKCS#12 entries are sorted by
/// alias; PEM files have no aliases.
struct Container {
    keys: Vec<KeyEntry>,
    trusted: Vec<(Option<String>, X509)>,
}

impl Container {
    fn all_certs(&self) -> impl Iterator<Item = &X509> + Clone {
        self.trusted
            .iter()
            .map(|(_, c)| c)
            .chain(self.keys.iter().flat_map(|k| k.certs.iter()))
    }
}

fn same_cert(a: &X509Ref, b: &X509Ref) -> bool {
    match (a.to_der(), b.to_der()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn dedup_certs<'a>(certs: impl Iterator<Item = &'a X509>) -> Vec<X509> {
    let mut out: Vec<X509> = Vec::new();
    for c in certs {
        if !out.iter().any(|o| same_cert(o, c)) {
            out.push(c.clone());
        }
    }
    out
}

fn open_pkcs12(path: &Path, bytes: &[u8], password: &str) -> Result<Container, ClusterTlsError> {
    let store = KeyStore::from_pkcs12(bytes, password).map_err(|e| {
        ClusterTlsError::container(
            path,
            format!("not a PKCS#12 archive or wrong password ({})", e),
        )
    })?;
    let from_der = |der: &[u8]| X509::from_der(der).map_err(|e| ClusterTlsError::container(path, e));

    let mut entries = store.entries().collect::<Vec<_>>();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut container = Container {
        keys: Vec::new(),
        trusted: Vec::new(),
    };
    for (alias, entry) in entries {
        match entry {
            KeyStoreEntry::PrivateKeyChain(chain) => {
                let key = PKey::private_key_from_pkcs8(chain.key()).map_err(|e| {
                    ClusterTlsError::container(
                        path,
                        format!("unreadable private key for alias {} ({})", alias, e),
                    )
                })?;
                let certs = chain
                    .chain()
                    .iter()
                    .map(|c| from_der(c.as_der()))
                    .collect::<Result<Vec<_>, _>>()?;
                container.keys.push(KeyEntry {
                    alias: Some(alias.to_string()),
                    key,
                    certs,
                });
            }
            KeyStoreEntry::Certificate(cert) => container
                .trusted
                .push((Some(alias.to_string()), from_der(cert.as_der())?)),
            #[allow(unreachable_patterns)]
            _ => log::debug!("Skipping entry {} of {}", alias, path.display()),
        }
    }
    Ok(container)
}

fn open_container(
    path: &Path,
    container_type: ContainerType,
    password: &str,
    want_key: bool,
) -> Result<Container, ClusterTlsError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    match container_type {
        ContainerType::Pkcs12 => open_pkcs12(path, &bytes, password),
        ContainerType::Pem => {
            let certs =
                X509::stack_from_pem(&bytes).map_err(|e| ClusterTlsError::container(path, e))?;
            let mut keys = Vec::new();
            if want_key {
                let key = PKey::private_key_from_pem_passphrase(&bytes, password.as_bytes())
                    .map_err(|e| {
                        ClusterTlsError::container(
                            path,
                            format!("no readable private key ({})", e),
                        )
                    })?;
                keys.push(KeyEntry {
                    alias: None,
                    key,
                    certs: certs.clone(),
                });
            }
            Ok(Container {
                keys,
                trusted: certs.into_iter().map(|c| (None, c)).collect(),
            })
        }
    }
}

/// The key entry named `alias`, or the first entry when no alias is given.
fn select_entry<'a>(
    path: &Path,
    container_type: ContainerType,
    keys: &'a [KeyEntry],
    alias: Option<&str>,
) -> Result<&'a KeyEntry, ClusterTlsError> {
    let Some(first) = keys.first() else {
        return Err(ClusterTlsError::container(path, "no private key entry"));
    };
    match (alias, container_type) {
        (Some(alias), ContainerType::Pem) => {
            log::warn!(
                "PEM keystore {} has no aliases; ignoring alias {}",
                path.display(),
                alias
            );
            Ok(first)
        }
        (Some(alias), ContainerType::Pkcs12) => keys
            .iter()
            .find(|k| {
                k.alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(alias))
            })
            .ok_or_else(|| {
                ClusterTlsError::container(path, format!("no key entry with alias {}", alias))
            }),
        (None, _) => {
            if keys.len() > 1 {
                log::warn!(
                    "Keystore {} holds {} key entries and no alias is configured; using {}",
                    path.display(),
                    keys.len(),
                    first.alias.as_deref().unwrap_or("the first")
                );
            }
            Ok(first)
        }
    }
}

/// The certificate of `entry`'s key followed by its issuers, as far as
/// `pool` goes or up to a self-signed certificate.
fn build_chain<'a>(
    entry: &'a KeyEntry,
    pool: impl Iterator<Item = &'a X509> + Clone,
) -> Option<Vec<X509>> {
    let leaf = entry
        .certs
        .iter()
        .find(|c| c.public_key().is_ok_and(|pk| pk.public_eq(&entry.key)))?;
    let mut chain = vec![leaf.clone()];
    loop {
        let current = &chain[chain.len() - 1];
        if current.issued(current) == X509VerifyResult::OK {
            break;
        }
        let issuer = entry.certs.iter().chain(pool.clone()).find(|c| {
            c.issued(current) == X509VerifyResult::OK
                && !chain.iter().any(|seen| same_cert(seen, c))
        });
        match issuer {
            Some(issuer) => {
                let issuer = issuer.clone();
                chain.push(issuer);
            }
            None => break,
        }
    }
    Some(chain)
}

fn pem_tempfile(blocks: &[Vec<u8>]) -> Result<NamedTempFile, ClusterTlsError> {
    let mut file = tempfile::Builder::new()
        .prefix("cluster_tls_")
        .suffix(".pem")
        .tempfile()?;
    for block in blocks {
        file.write_all(block)?;
    }
    file.flush()?;
    Ok(file)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClusterTlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    Ok(rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?)
}

/// An identity exported from a keystore. The files are removed on drop.
#[derive(Debug)]
pub struct CertificateMaterial {
    cert_chain: NamedTempFile,
    key: NamedTempFile,
}

impl CertificateMaterial {
    /// PEM file holding the chain, end-entity certificate first.
    pub fn cert_chain_path(&self) -> &Path {
        self.cert_chain.path()
    }

    /// PEM file holding the unencrypted PKCS#8 private key.
    pub fn key_path(&self) -> &Path {
        self.key.path()
    }

    /// Read the material back for building a TLS context.
    pub fn load(
        &self,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ClusterTlsError> {
        let cert = read_certs(self.cert_chain_path())?;
        let mut reader = BufReader::new(File::open(self.key_path())?);
        let key = rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no private key found in {}", self.key_path().display()),
            )
        })?;
        Ok((cert, key))
    }
}

/// Trust anchors exported from a truststore. The file is removed on drop.
#[derive(Debug)]
pub struct TrustMaterial {
    certs: NamedTempFile,
}

impl TrustMaterial {
    /// PEM file holding the trusted certificates.
    pub fn path(&self) -> &Path {
        self.certs.path()
    }

    /// Read the certificates back.
    pub fn load(&self) -> Result<Vec<CertificateDer<'static>>, ClusterTlsError> {
        read_certs(self.path())
    }

    /// The certificates as a verifier's trust anchors.
    pub fn root_store(&self) -> Result<RootCertStore, ClusterTlsError> {
        let mut roots = RootCertStore::empty();
        let (_, ignored) = roots.add_parsable_certificates(self.load()?);
        if ignored > 0 {
            log::warn!(
                "Ignored {} unusable certificate(s) from truststore {}",
                ignored,
                self.path().display()
            );
        }
        if roots.is_empty() {
            return Err(ClusterTlsError::Configuration(format!(
                "No usable trust anchors in {}",
                self.path().display()
            )));
        }
        Ok(roots)
    }
}

/// Export the identity in a keystore. With `alias`, the key entry of
/// that name (compared case-insensitively) must exist; without, the first
/// key entry in alias order is used. The exported chain is the entry's
/// certificate followed by its issuers and nothing else.
pub fn materialize(
    path: &Path,
    container_type: ContainerType,
    password: &str,
    alias: Option<&str>,
) -> Result<CertificateMaterial, ClusterTlsError> {
    check_store_file(StoreKind::Keystore, path)?;
    let container = open_container(path, container_type, password, true)?;
    let entry = select_entry(path, container_type, &container.keys, alias)?;
    let Some(chain) = build_chain(entry, container.all_certs()) else {
        return Err(ClusterTlsError::container(path, "no certificate for the private key"));
    };

    let chain = chain
        .iter()
        .map(|c| c.to_pem())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClusterTlsError::container(path, e))?;
    let key_pem = entry
        .key
        .private_key_to_pem_pkcs8()
        .map_err(|e| ClusterTlsError::container(path, e))?;
    Ok(CertificateMaterial {
        cert_chain: pem_tempfile(&chain)?,
        key: pem_tempfile(&[key_pem])?,
    })
}

/// Export the trusted certificates of a truststore, or only the entry
/// named `alias`. Certificates stored with key entries count as trusted.
pub fn materialize_trust(
    path: &Path,
    container_type: ContainerType,
    password: &str,
    alias: Option<&str>,
) -> Result<TrustMaterial, ClusterTlsError> {
    check_store_file(StoreKind::Truststore, path)?;
    let container = open_container(path, container_type, password, false)?;
    let certs = match (alias, container_type) {
        (Some(alias), ContainerType::Pkcs12) => {
            let named = |a: &Option<String>| {
                a.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(alias))
            };
            dedup_certs(
                container
                    .trusted
                    .iter()
                    .filter(|(a, _)| named(a))
                    .map(|(_, c)| c)
                    .chain(
                        container
                            .keys
                            .iter()
                            .filter(|k| named(&k.alias))
                            .flat_map(|k| k.certs.iter()),
                    ),
            )
        }
        (Some(alias), ContainerType::Pem) => {
            log::warn!(
                "PEM truststore {} has no aliases; ignoring alias {}",
                path.display(),
                alias
            );
            dedup_certs(container.all_certs())
        }
        (None, _) => dedup_certs(container.all_certs()),
    };
    if certs.is_empty() {
        return Err(ClusterTlsError::container(path, "no trusted certificates"));
    }
    let blocks = certs
        .iter()
        .map(|c| c.to_pem())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClusterTlsError::container(path, e))?;
    Ok(TrustMaterial {
        certs: pem_tempfile(&blocks)?,
    })
}
