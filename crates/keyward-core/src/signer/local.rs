use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::rand_core::{OsRng, RngCore};
use ssh_key::{PrivateKey, PublicKey};
use tracing::debug;

use super::{check_request, SignError, Signer};
use crate::request::CertRequest;
use crate::{unix_now, ConfigError};

/// Certificates are valid from this many seconds before issuance, to
/// absorb clock skew between the service and SSH servers.
pub const BACKDATE_SECS: u64 = 60;

/// Local CA settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSignerConfig {
    /// OpenSSH private key of the CA (unencrypted).
    pub ca_key: PathBuf,
    /// CA public key in authorized-key format.
    pub ca_cert: PathBuf,
    /// Certificate lifetime in seconds.
    pub ttl: u64,
    #[serde(default)]
    pub critical_options: BTreeMap<String, String>,
    #[serde(default = "default_extensions")]
    pub extensions: BTreeMap<String, String>,
}

/// The usual interactive-login permissions, as `ssh-keygen` grants them.
pub fn default_extensions() -> BTreeMap<String, String> {
    [
        "permit-X11-forwarding",
        "permit-agent-forwarding",
        "permit-port-forwarding",
        "permit-pty",
        "permit-user-rc",
    ]
    .into_iter()
    .map(|name| (name.to_string(), String::new()))
    .collect()
}

/// Signs user certificates with a CA key held in memory.
///
/// The key is loaded once and never mutated; signing takes a shared
/// reference, so concurrent requests need no lock.
pub struct LocalSigner {
    ca_key: Arc<PrivateKey>,
    ca_public: PublicKey,
    ttl: u64,
    critical_options: BTreeMap<String, String>,
    extensions: BTreeMap<String, String>,
}

impl LocalSigner {
    pub fn new(ca_key: PrivateKey, ttl: u64) -> Result<Self, ConfigError> {
        if ca_key.is_encrypted() {
            return Err(ConfigError::invalid("ca_key", "encrypted CA keys are not supported"));
        }
        if ttl == 0 {
            return Err(ConfigError::invalid("ttl", "must be greater than zero"));
        }
        Ok(Self {
            ca_public: ca_key.public_key().clone(),
            ca_key: Arc::new(ca_key),
            ttl,
            critical_options: BTreeMap::new(),
            extensions: default_extensions(),
        })
    }

    pub fn with_critical_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.critical_options = options;
        self
    }

    pub fn with_extensions(mut self, extensions: BTreeMap<String, String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Loads the CA key pair named in `config`.
    ///
    /// Fails if either file is unreadable or unparseable, or if the public
    /// key does not belong to the private key.
    pub fn from_config(config: LocalSignerConfig) -> Result<Self, ConfigError> {
        let ca_key = PrivateKey::from_openssh(read(&config.ca_key)?)
            .map_err(|e| ConfigError::invalid("ca_key", format!("error parsing CA private key: {e}")))?;
        let ca_cert = PublicKey::from_openssh(read(&config.ca_cert)?.trim())
            .map_err(|e| ConfigError::invalid("ca_cert", format!("error parsing CA public key: {e}")))?;
        if ca_cert.key_data() != ca_key.public_key().key_data() {
            return Err(ConfigError::invalid(
                "ca_cert",
                "public key does not match the CA private key",
            ));
        }

        Ok(Self::new(ca_key, config.ttl)?
            .with_critical_options(config.critical_options)
            .with_extensions(config.extensions))
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    fn build_and_sign(&self, request: &CertRequest, now: u64) -> Result<String, SignError> {
        let user_key = PublicKey::from_openssh(request.public_key.trim())
            .map_err(|e| SignError::InvalidPublicKey(e.to_string()))?;
        let serial = OsRng.next_u64();
        let valid_after = now.saturating_sub(BACKDATE_SECS);
        let valid_before = now.saturating_add(self.ttl);

        let signing = |e: ssh_key::Error| SignError::Signing(e.to_string());
        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            user_key.key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(signing)?;
        builder
            .serial(serial)
            .map_err(signing)?
            .key_id(&request.id)
            .map_err(signing)?
            .cert_type(CertType::User)
            .map_err(signing)?;
        for principal in &request.principals {
            builder.valid_principal(principal).map_err(signing)?;
        }
        for (name, data) in &self.critical_options {
            builder.critical_option(name, data).map_err(signing)?;
        }
        for (name, data) in &self.extensions {
            builder.extension(name, data).map_err(signing)?;
        }

        let certificate = builder.sign(self.ca_key.as_ref()).map_err(signing)?;
        let encoded = certificate.to_openssh().map_err(signing)?;
        if encoded.is_empty() {
            return Err(SignError::Signing("empty certificate encoding".into()));
        }
        debug!(serial, key_id = %request.id, valid_before, "certificate signed");
        Ok(encoded)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl Signer for LocalSigner {
    fn name(&self) -> &str {
        "local"
    }

    async fn sign(&self, request: &CertRequest) -> Result<String, SignError> {
        check_request(request)?;
        self.build_and_sign(request, unix_now())
    }

    async fn read_ca(&self) -> Result<String, SignError> {
        self.ca_public
            .to_openssh()
            .map_err(|e| SignError::Signing(e.to_string()))
    }
}
