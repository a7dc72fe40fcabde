//! Key and certificate files under `~/.ssh`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, Certificate, LineEnding, PrivateKey};
use tracing::{debug, info};

/// Expands a leading `~/` to the home directory.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            Ok(home.join(rest))
        }
        None if path == "~" => dirs::home_dir().context("could not determine home directory"),
        None => Ok(PathBuf::from(path)),
    }
}

/// `id_ed25519.pub` -> `id_ed25519`
pub fn private_key_path(public_key: &Path) -> Result<PathBuf> {
    let name = public_key
        .file_name()
        .and_then(|n| n.to_str())
        .context("public key path has no file name")?;
    match name.strip_suffix(".pub") {
        Some(stem) if !stem.is_empty() => Ok(public_key.with_file_name(stem)),
        _ => bail!("public key path {} must end with .pub", public_key.display()),
    }
}

/// `id_ed25519.pub` -> `id_ed25519-cert.pub`
pub fn certificate_path(public_key: &Path) -> Result<PathBuf> {
    let private = private_key_path(public_key)?;
    let mut name = private.file_name().unwrap_or_default().to_os_string();
    name.push("-cert.pub");
    Ok(private.with_file_name(name))
}

/// Creates an Ed25519 key pair at `public_key` (minus `.pub`) unless the
/// public half already exists. Returns true when a key was generated.
pub fn ensure_key_pair(public_key: &Path) -> Result<bool> {
    if public_key.exists() {
        return Ok(false);
    }
    let private_path = private_key_path(public_key)?;
    if private_path.exists() {
        bail!(
            "{} exists without {}; refusing to overwrite it",
            private_path.display(),
            public_key.display()
        );
    }
    if let Some(dir) = public_key.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .context("failed to generate ed25519 key")?;
    let private_pem = key
        .to_openssh(LineEnding::LF)
        .context("failed to encode private key")?;
    write_with_mode(&private_path, private_pem.as_bytes(), 0o600)?;
    let public = key
        .public_key()
        .to_openssh()
        .context("failed to encode public key")?;
    write_with_mode(public_key, format!("{public}\n").as_bytes(), 0o644)?;

    info!(path = %private_path.display(), "generated ed25519 key pair");
    Ok(true)
}

pub fn read_public_key(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read public key {}", path.display()))?;
    Ok(text.trim().to_string())
}

/// What the client reports after signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    pub principals: Vec<String>,
    pub valid_before: u64,
}

pub fn cert_info(certificate: &str) -> Result<CertInfo> {
    let cert = Certificate::from_openssh(certificate.trim())
        .context("server returned an unparseable certificate")?;
    Ok(CertInfo {
        principals: cert.valid_principals().to_vec(),
        valid_before: cert.valid_before(),
    })
}

/// True when `path` holds a certificate that is still valid at `now`.
pub fn certificate_still_valid(path: &Path, now: u64) -> bool {
    let Ok(text) = fs::read_to_string(path) else {
        return false;
    };
    match cert_info(&text) {
        Ok(info) => info.valid_before > now,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring existing certificate");
            false
        }
    }
}

pub fn write_certificate(path: &Path, certificate: &str) -> Result<()> {
    let mut text = certificate.trim_end().to_string();
    text.push('\n');
    write_with_mode(path, text.as_bytes(), 0o644)
}

fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssh_key::certificate::{Builder, CertType};

    fn signed_cert(valid_before: u64) -> String {
        let ca = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let user = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            user.public_key().key_data().clone(),
            0,
            valid_before,
        )
        .unwrap();
        builder.cert_type(CertType::User).unwrap();
        builder.valid_principal("ops").unwrap();
        builder.valid_principal("admin").unwrap();
        builder.sign(&ca).unwrap().to_openssh().unwrap()
    }

    #[test]
    fn test_paths() {
        let public = Path::new("/home/alice/.ssh/id_ed25519.pub");
        assert_eq!(
            private_key_path(public).unwrap(),
            Path::new("/home/alice/.ssh/id_ed25519")
        );
        assert_eq!(
            certificate_path(public).unwrap(),
            Path::new("/home/alice/.ssh/id_ed25519-cert.pub")
        );
        assert!(private_key_path(Path::new("/tmp/key")).is_err());
        assert!(private_key_path(Path::new("/tmp/.pub")).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/x").unwrap(), Path::new("/etc/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/k.pub").unwrap(), home.join(".ssh/k.pub"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_generates_key_pair_with_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("ssh/id_ed25519.pub");
        assert!(ensure_key_pair(&public).unwrap());
        assert!(!ensure_key_pair(&public).unwrap());

        let private = dir.path().join("ssh/id_ed25519");
        let mode = fs::metadata(&private).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let key = PrivateKey::read_openssh_file(&private).unwrap();
        assert_eq!(
            read_public_key(&public).unwrap(),
            key.public_key().to_openssh().unwrap()
        );
    }

    #[test]
    fn test_refuses_orphan_private_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("id_ed25519"), "secret").unwrap();
        assert!(ensure_key_pair(&dir.path().join("id_ed25519.pub")).is_err());
    }

    #[test]
    fn test_certificate_validity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519-cert.pub");
        assert!(!certificate_still_valid(&path, 100));

        write_certificate(&path, &signed_cert(1_000)).unwrap();
        assert!(certificate_still_valid(&path, 999));
        assert!(!certificate_still_valid(&path, 1_000));

        fs::write(&path, "garbage").unwrap();
        assert!(!certificate_still_valid(&path, 0));
    }

    #[test]
    fn test_cert_info() {
        let info = cert_info(&signed_cert(42)).unwrap();
        assert_eq!(
            info,
            CertInfo {
                principals: vec!["ops".into(), "admin".into()],
                valid_before: 42,
            }
        );
        assert!(cert_info("ssh-ed25519 AAAA").is_err());
    }
}
