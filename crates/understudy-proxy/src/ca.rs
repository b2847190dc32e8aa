//! Certificate Authority management for TLS interception.
//!
//! Generates and persists the root pair, and issues per-host leaf
//! certificates signed by it. Leaves reuse the root key pair, so issuing one
//! costs a signature and no key generation.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
    SignatureAlgorithm,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate};

pub use crate::error::CaError;

/// CA certificate and key file names.
const CA_CERT_FILENAME: &str = "understudy-ca.crt";
const CA_KEY_FILENAME: &str = "understudy-ca.key";

/// Default root common name.
pub const DEFAULT_CERT_NAME: &str = "understudy.proxy";

/// Default root organization.
pub const DEFAULT_CERT_ORG: &str = "Understudy Authority";

/// Default validity of root and leaf certificates, in days.
pub const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// Serial numbers are random and at most this many bytes long.
const SERIAL_LEN: usize = 16;

/// Key algorithms the authority can generate and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    /// RSA 2048 with SHA-256.
    #[default]
    Rsa2048,
    /// ECDSA on P-256 with SHA-256.
    EcdsaP256,
}

impl KeyAlgorithm {
    /// Returns the algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2048 => "rsa2048",
            Self::EcdsaP256 => "ecdsa-p256",
        }
    }

    fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        match self {
            Self::Rsa2048 => &rcgen::PKCS_RSA_SHA256,
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        }
    }

    /// Identifies the algorithm of an existing key.
    pub fn of_key(key: &KeyPair) -> Result<Self, CaError> {
        let algorithm = key.algorithm();
        if algorithm == &rcgen::PKCS_RSA_SHA256 {
            Ok(Self::Rsa2048)
        } else if algorithm == &rcgen::PKCS_ECDSA_P256_SHA256 {
            Ok(Self::EcdsaP256)
        } else {
            Err(CaError::UnsupportedAlgorithm(format!("{:?}", algorithm)))
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa" | "rsa2048" => Ok(Self::Rsa2048),
            "ecdsa" | "ecdsa-p256" | "p256" => Ok(Self::EcdsaP256),
            other => Err(CaError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

fn generate_key_pair(algorithm: KeyAlgorithm) -> Result<KeyPair, CaError> {
    match KeyPair::generate_for(algorithm.signature_algorithm()) {
        Ok(key) => Ok(key),
        Err(e) if algorithm == KeyAlgorithm::Rsa2048 => {
            tracing::warn!("RSA key generation failed ({}), falling back to ECDSA P-256", e);
            KeyPair::generate_for(KeyAlgorithm::EcdsaP256.signature_algorithm())
                .map_err(|e| CaError::Generation(e.to_string()))
        }
        Err(e) => Err(CaError::Generation(e.to_string())),
    }
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Positive and non-zero
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from(bytes.to_vec())
}

/// Splits a trailing port off `host:port` and unwraps `[v6]` literals.
fn strip_port(hostname: &str) -> &str {
    if let Some(rest) = hostname.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match hostname.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => hostname,
    }
}

fn is_dns_name(host: &str) -> bool {
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '*'))
}

/// Current time truncated to whole seconds, the precision of X.509 times.
fn now_seconds() -> Result<DateTime<Utc>, CaError> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0)
        .ok_or_else(|| CaError::Generation("system clock out of range".to_string()))
}

fn offset_time(at: DateTime<Utc>) -> Result<OffsetDateTime, CaError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CaError::Generation(e.to_string()))
}

fn check_validity(validity_days: i64) -> Result<Duration, CaError> {
    if validity_days < 1 {
        return Err(CaError::Generation(format!(
            "validity must be at least one day, got {}",
            validity_days
        )));
    }
    Ok(Duration::days(validity_days))
}

/// A leaf certificate chain and its private key.
#[derive(Debug)]
pub struct LeafCertificate {
    /// Leaf first, then the root.
    pub chain: Vec<CertificateDer<'static>>,
    /// Private key of the leaf.
    pub key: PrivateKeyDer<'static>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
}

/// The root certificate and key that sign every leaf.
pub struct RootAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    organization: String,
    algorithm: KeyAlgorithm,
}

impl fmt::Debug for RootAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootAuthority")
            .field("organization", &self.organization)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl RootAuthority {
    /// Generates a self-signed root valid for `[now - validity, now + validity]`.
    pub fn generate(
        common_name: &str,
        organization: &str,
        validity_days: i64,
        algorithm: KeyAlgorithm,
    ) -> Result<Self, CaError> {
        let validity = check_validity(validity_days)?;
        let key = generate_key_pair(algorithm)?;
        let algorithm = KeyAlgorithm::of_key(&key)?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, organization);
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_identifier_method = KeyIdMethod::Sha256;
        params.serial_number = Some(random_serial());

        // Backdated start
        let now = now_seconds()?;
        params.not_before = offset_time(now - validity)?;
        params.not_after = offset_time(now + validity)?;

        let cert = params
            .self_signed(&key)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        Ok(Self {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            issuer: Issuer::new(params, key),
            organization: organization.to_string(),
            algorithm,
        })
    }

    /// Loads a root pair from PEM text.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let key = KeyPair::from_pem(key_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        let algorithm = KeyAlgorithm::of_key(&key)?;

        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate found in PEM".to_string()))?
            .map_err(|e| CaError::Parse(e.to_string()))?;

        let (_, parsed) =
            X509Certificate::from_der(&cert_der).map_err(|e| CaError::Parse(e.to_string()))?;
        let organization = parsed
            .subject()
            .iter_organization()
            .next()
            .and_then(|org| org.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let issuer = Issuer::from_ca_cert_der(&cert_der, key)
            .map_err(|e| CaError::Parse(e.to_string()))?;

        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
            organization,
            algorithm,
        })
    }

    /// Root certificate as DER.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Root certificate as PEM.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Root private key as PEM.
    pub fn key_pem(&self) -> String {
        self.issuer.key().serialize_pem()
    }

    /// Subject organization, copied into every leaf.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Algorithm of the root key.
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Issues a leaf for `hostname` valid for `[now, now + validity]`.
    ///
    /// A port suffix is stripped. IP literals get an IP subject alternative
    /// name, anything else a DNS name.
    pub fn issue_leaf(
        &self,
        hostname: &str,
        validity_days: i64,
    ) -> Result<LeafCertificate, CaError> {
        let validity = check_validity(validity_days)?;
        let host = strip_port(hostname.trim());
        if host.is_empty() {
            return Err(CaError::Generation("empty hostname".to_string()));
        }

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        if !self.organization.is_empty() {
            dn.push(DnType::OrganizationName, self.organization.as_str());
        }
        params.distinguished_name = dn;

        params.subject_alt_names = vec![match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) if !is_dns_name(host) => {
                return Err(CaError::Generation(format!("invalid hostname: {}", host)));
            }
            Err(_) => SanType::DnsName(
                host.try_into()
                    .map_err(|_| CaError::Generation(format!("invalid hostname: {}", host)))?,
            ),
        }];

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial());

        let now = now_seconds()?;
        let not_after = now + validity;
        params.not_before = offset_time(now)?;
        params.not_after = offset_time(not_after)?;

        let cert = params
            .signed_by(self.issuer.key(), &self.issuer)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        tracing::debug!("Issued leaf certificate for {}", host);

        Ok(LeafCertificate {
            chain: vec![cert.der().clone(), self.cert_der.clone()],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                self.issuer.key().serialize_der(),
            )),
            not_after,
        })
    }
}

/// Manages the persisted root pair.
#[derive(Debug, Clone)]
pub struct CaManager {
    /// Path to the CA directory.
    ca_dir: PathBuf,
    cert_name: String,
    cert_org: String,
    algorithm: KeyAlgorithm,
    validity_days: i64,
}

impl CaManager {
    /// Creates a new CA manager with the given directory.
    pub fn new(ca_dir: impl AsRef<Path>) -> Self {
        Self {
            ca_dir: ca_dir.as_ref().to_path_buf(),
            cert_name: DEFAULT_CERT_NAME.to_string(),
            cert_org: DEFAULT_CERT_ORG.to_string(),
            algorithm: KeyAlgorithm::default(),
            validity_days: DEFAULT_VALIDITY_DAYS,
        }
    }

    /// Creates a CA manager using the default Understudy data directory.
    pub fn with_default_dir() -> Result<Self, CaError> {
        let project_dirs = directories::ProjectDirs::from("io", "understudy", "Understudy")
            .ok_or_else(|| CaError::Generation("Failed to get project dirs".into()))?;

        let ca_dir = project_dirs.data_dir().join("ca");
        Ok(Self::new(ca_dir))
    }

    /// Sets the subject of generated roots.
    pub fn with_subject(mut self, cert_name: impl Into<String>, cert_org: impl Into<String>) -> Self {
        self.cert_name = cert_name.into();
        self.cert_org = cert_org.into();
        self
    }

    /// Sets the key algorithm of generated roots.
    pub fn with_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the validity of generated roots, in days.
    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity_days = days;
        self
    }

    /// Returns the CA directory.
    pub fn ca_dir(&self) -> &Path {
        &self.ca_dir
    }

    /// Returns the path to the CA certificate file.
    pub fn cert_path(&self) -> PathBuf {
        self.ca_dir.join(CA_CERT_FILENAME)
    }

    /// Returns the path to the CA private key file.
    pub fn key_path(&self) -> PathBuf {
        self.ca_dir.join(CA_KEY_FILENAME)
    }

    /// Checks if the CA certificate exists.
    pub fn ca_exists(&self) -> bool {
        self.cert_path().exists() && self.key_path().exists()
    }

    /// Loads the root pair, generating it first if necessary.
    pub fn ensure_ca(&self) -> Result<RootAuthority, CaError> {
        if self.ca_exists() {
            self.load_ca()
        } else {
            self.generate_ca()
        }
    }

    /// Generates a new root pair and writes it to disk, replacing any
    /// existing one.
    pub fn generate_ca(&self) -> Result<RootAuthority, CaError> {
        fs::create_dir_all(&self.ca_dir).map_err(|e| CaError::Write(e.to_string()))?;

        let root = RootAuthority::generate(
            &self.cert_name,
            &self.cert_org,
            self.validity_days,
            self.algorithm,
        )?;

        fs::write(self.cert_path(), root.cert_pem())
            .map_err(|e| CaError::Write(e.to_string()))?;
        fs::write(self.key_path(), root.key_pem()).map_err(|e| CaError::Write(e.to_string()))?;

        tracing::info!(
            "Generated new {} CA certificate at {:?}",
            root.algorithm(),
            self.cert_path()
        );

        Ok(root)
    }

    /// Loads the root pair from disk.
    pub fn load_ca(&self) -> Result<RootAuthority, CaError> {
        let cert_pem = fs::read_to_string(self.cert_path())?;
        let key_pem = fs::read_to_string(self.key_path())?;
        let root = RootAuthority::from_pem(&cert_pem, &key_pem)?;
        tracing::debug!("Loaded CA certificate from {:?}", self.cert_path());
        Ok(root)
    }
}
