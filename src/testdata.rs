//! Generated PKI and container files for tests.

use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;
use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair,
};
use rustls_pki_types::CertificateDer;
use std::path::PathBuf;

pub const PASSWORD: &str = "changeit";

pub struct Identity {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Identity {
    pub fn cert_der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert.to_der().unwrap())
    }
}

/// A CA able to issue node certificates.
pub struct Pki {
    pub name: String,
    pub ca_cert: X509,
    issuer: Issuer<'static, KeyPair>,
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, "cluster_tls tests");
    dn.push(DnType::CommonName, cn);
    dn
}

impl Pki {
    pub fn new(name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name = dn(&format!("{} CA", name));
        let key = KeyPair::generate().unwrap();
        let cert = params.clone().self_signed(&key).unwrap();
        Self {
            name: name.to_string(),
            ca_cert: X509::from_pem(cert.pem().as_bytes()).unwrap(),
            issuer: Issuer::new(params, key),
        }
    }

    fn issue_with(&self, host: &str, params: impl FnOnce(&mut CertificateParams)) -> Identity {
        let mut p = CertificateParams::new(vec![host.to_string()]).unwrap();
        p.distinguished_name = dn(host);
        p.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params(&mut p);
        let key = KeyPair::generate().unwrap();
        let cert = p.signed_by(&key, &self.issuer).unwrap();
        Identity {
            cert: X509::from_pem(cert.pem().as_bytes()).unwrap(),
            key: PKey::private_key_from_pem(key.serialize_pem().as_bytes()).unwrap(),
        }
    }

    /// A certificate for `host`, usable as server and as client.
    pub fn issue(&self, host: &str) -> Identity {
        self.issue_with(host, |_| ())
    }

    /// As [`Pki::issue`], but it expired long ago.
    pub fn issue_expired(&self, host: &str) -> Identity {
        self.issue_with(host, |p| {
            p.not_before = rcgen::date_time_ymd(1999, 1, 1);
            p.not_after = rcgen::date_time_ymd(2000, 1, 1);
        })
    }
}

fn p12_cert(cert: &X509) -> Certificate {
    Certificate::from_der(&cert.to_der().unwrap()).unwrap()
}

/// A directory of container files, deleted on drop.
pub struct Stores {
    pub dir: tempfile::TempDir,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, file_name: &str, store: &KeyStore) -> PathBuf {
        let path = self.dir.path().join(file_name);
        std::fs::write(&path, store.writer(PASSWORD).write().unwrap()).unwrap();
        path
    }

    /// PKCS#12 keystore holding `id` under `alias`, plus the CA.
    pub fn keystore(&self, alias: &str, id: &Identity, pki: &Pki) -> PathBuf {
        self.multi_keystore(alias, &[(alias, id, pki)])
    }

    /// PKCS#12 keystore with one key entry per `(alias, identity, CA)`.
    pub fn multi_keystore(&self, name: &str, entries: &[(&str, &Identity, &Pki)]) -> PathBuf {
        let mut store = KeyStore::new();
        for (alias, id, pki) in entries {
            let chain = PrivateKeyChain::new(
                id.key.private_key_to_pkcs8().unwrap(),
                alias.as_bytes(),
                [p12_cert(&id.cert), p12_cert(&pki.ca_cert)],
            );
            store.add_entry(alias, KeyStoreEntry::PrivateKeyChain(chain));
        }
        self.write(&format!("{}.p12", name), &store)
    }

    /// PKCS#12 keystore as written by OpenSSL, the way `openssl pkcs12
    /// -export` would.
    pub fn openssl_keystore(&self, alias: &str, id: &Identity, pki: &Pki) -> PathBuf {
        let mut ca = Stack::new().unwrap();
        ca.push(pki.ca_cert.clone()).unwrap();
        let der = Pkcs12::builder()
            .name(alias)
            .pkey(&id.key)
            .cert(&id.cert)
            .ca(ca)
            .build2(PASSWORD)
            .unwrap()
            .to_der()
            .unwrap();
        let path = self.dir.path().join(format!("{}-openssl.p12", alias));
        std::fs::write(&path, der).unwrap();
        path
    }

    /// PKCS#12 truststore with one certificate entry per CA, under the
    /// CA's name.
    pub fn truststore(&self, name: &str, pkis: &[&Pki]) -> PathBuf {
        let mut store = KeyStore::new();
        for pki in pkis {
            store.add_entry(&pki.name, KeyStoreEntry::Certificate(p12_cert(&pki.ca_cert)));
        }
        self.write(&format!("{}-trust.p12", name), &store)
    }

    /// PEM bundle: CA certificate, key (encrypted if `passphrase` is
    /// given), then the end-entity certificate.
    pub fn pem_bundle(
        &self,
        name: &str,
        id: &Identity,
        pki: &Pki,
        passphrase: Option<&str>,
    ) -> PathBuf {
        let mut pem = pki.ca_cert.to_pem().unwrap();
        pem.extend(match passphrase {
            Some(p) => id
                .key
                .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), p.as_bytes())
                .unwrap(),
            None => id.key.private_key_to_pem_pkcs8().unwrap(),
        });
        pem.extend(id.cert.to_pem().unwrap());
        let path = self.dir.path().join(format!("{}.pem", name));
        std::fs::write(&path, pem).unwrap();
        path
    }
}
