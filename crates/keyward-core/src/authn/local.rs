use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use zeroize::Zeroizing;

use super::{require_credentials, Authenticated, AuthnError, Authenticator};
use crate::otp;
use crate::request::SignRequest;
use crate::ConfigError;

/// Users known to the local authenticator.
///
/// Each value is a bcrypt hash, optionally followed by a comma and the
/// base32 encrypted TOTP seed produced by `keyward-server hash`.
#[derive(Clone, Deserialize)]
pub struct LocalAuthenticatorConfig {
    pub users: HashMap<String, String>,
}

impl fmt::Debug for LocalAuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAuthenticatorConfig")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Stored credentials for one user.
#[derive(Clone)]
struct UserRecord {
    hash: String,
    encrypted_seed: Option<String>,
}

impl UserRecord {
    fn parse(raw: &str) -> Self {
        let (hash, seed) = match raw.split_once(',') {
            Some((hash, seed)) => (hash, Some(seed.trim())),
            None => (raw, None),
        };
        Self {
            hash: hash.trim().to_string(),
            encrypted_seed: seed.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }
}

/// Authenticates against bcrypt hashes held in configuration.
pub struct LocalAuthenticator {
    users: HashMap<String, UserRecord>,
}

impl LocalAuthenticator {
    pub fn from_config(config: LocalAuthenticatorConfig) -> Result<Self, ConfigError> {
        let users = config
            .users
            .iter()
            .map(|(user, raw)| {
                let record = UserRecord::parse(raw);
                if record.hash.is_empty() {
                    return Err(ConfigError::invalid("users", format!("empty hash for {user}")));
                }
                Ok((user.clone(), record))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { users })
    }

    fn check_otp(seed: &str, request: &SignRequest) -> Result<(), AuthnError> {
        let code = request.otp().ok_or(AuthnError::OtpRequired)?;
        let seed = otp::decrypt_seed(seed, &request.password).map_err(|e| {
            // A wrong password was already rejected, so this is a bad record.
            AuthnError::backend(format!("stored otp seed for {}: {e}", request.user))
        })?;
        if otp::verify_code(&seed, code, crate::unix_now()).map_err(AuthnError::backend)? {
            Ok(())
        } else {
            Err(AuthnError::OtpMismatch)
        }
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    fn name(&self) -> &str {
        "local"
    }

    async fn authenticate(&self, request: &SignRequest) -> Result<Authenticated, AuthnError> {
        require_credentials(request)?;

        let record = self
            .users
            .get(&request.user)
            .cloned()
            .ok_or(AuthnError::UserNotFound)?;

        let password = Zeroizing::new(request.password.clone());
        let hash = record.hash.clone();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password.as_str(), &hash))
            .await
            .map_err(AuthnError::backend)?
            .map_err(|e| AuthnError::backend(format!("stored hash for {}: {e}", request.user)))?;
        if !matches {
            return Err(AuthnError::BadPassword);
        }

        if let Some(seed) = &record.encrypted_seed {
            Self::check_otp(seed, request)?;
            debug!(user = %request.user, "otp verified");
        }

        Ok(Authenticated::new(format!("local-{}", request.user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // bcrypt cost 4 keeps the tests fast.
    fn hash(password: &str) -> String {
        bcrypt::hash(password, 4).unwrap()
    }

    fn authenticator(users: &[(&str, String)]) -> LocalAuthenticator {
        let config = LocalAuthenticatorConfig {
            users: users
                .iter()
                .map(|(u, r)| (u.to_string(), r.clone()))
                .collect(),
        };
        LocalAuthenticator::from_config(config).unwrap()
    }

    fn request(user: &str, password: &str) -> SignRequest {
        SignRequest::new(user, password, "ssh-ed25519 AAAA")
    }

    #[tokio::test]
    async fn test_valid_password() {
        let authn = authenticator(&[("alice", hash("hunter2"))]);
        let result = authn.authenticate(&request("alice", "hunter2")).await.unwrap();
        assert_eq!(result.identity, "local-alice");
    }

    #[tokio::test]
    async fn test_rejections() {
        let authn = authenticator(&[("alice", hash("hunter2"))]);

        let err = authn.authenticate(&request("alice", "wrong")).await.unwrap_err();
        assert!(matches!(err, AuthnError::BadPassword));

        let err = authn.authenticate(&request("bob", "hunter2")).await.unwrap_err();
        assert!(matches!(err, AuthnError::UserNotFound));

        let err = authn.authenticate(&request("", "hunter2")).await.unwrap_err();
        assert!(matches!(err, AuthnError::EmptyUser));

        let err = authn.authenticate(&request("alice", "")).await.unwrap_err();
        assert!(matches!(err, AuthnError::EmptyPassword));
    }

    #[tokio::test]
    async fn test_trailing_comma_means_no_otp() {
        let authn = authenticator(&[("alice", format!("{},", hash("hunter2")))]);
        assert!(authn.authenticate(&request("alice", "hunter2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_otp_flow() {
        let seed = otp::generate_seed();
        let record = format!("{},{}", hash("hunter2"), otp::encrypt_seed(&seed, "hunter2").unwrap());
        let authn = authenticator(&[("alice", record)]);

        let err = authn.authenticate(&request("alice", "hunter2")).await.unwrap_err();
        assert!(matches!(err, AuthnError::OtpRequired));

        let code = otp::generate_code(&seed, otp::current_step()).unwrap();
        let ok = authn
            .authenticate(&request("alice", "hunter2").with_otp(code))
            .await
            .unwrap();
        assert_eq!(ok.identity, "local-alice");

        let previous = otp::generate_code(&seed, otp::current_step() - 1).unwrap();
        assert!(authn
            .authenticate(&request("alice", "hunter2").with_otp(previous))
            .await
            .is_ok());

        let stale = otp::generate_code(&seed, otp::current_step() - 5).unwrap();
        let current = otp::generate_code(&seed, otp::current_step()).unwrap();
        let before = otp::generate_code(&seed, otp::current_step() - 1).unwrap();
        if stale != current && stale != before {
            let err = authn
                .authenticate(&request("alice", "hunter2").with_otp(stale))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthnError::OtpMismatch));
        }
    }

    #[tokio::test]
    async fn test_wrong_password_never_reports_otp_required() {
        let seed = otp::generate_seed();
        let record = format!("{},{}", hash("hunter2"), otp::encrypt_seed(&seed, "hunter2").unwrap());
        let authn = authenticator(&[("alice", record)]);

        let err = authn.authenticate(&request("alice", "nope")).await.unwrap_err();
        assert!(matches!(err, AuthnError::BadPassword));
    }

    #[tokio::test]
    async fn test_corrupt_seed_is_backend_error() {
        let record = format!("{},!!!notbase32", hash("hunter2"));
        let authn = authenticator(&[("alice", record)]);
        let err = authn
            .authenticate(&request("alice", "hunter2").with_otp("123456"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Backend(_)));
    }

    #[test]
    fn test_empty_hash_is_config_error() {
        let config = LocalAuthenticatorConfig {
            users: [("alice".to_string(), ",SEED".to_string())].into(),
        };
        assert!(LocalAuthenticator::from_config(config).is_err());
    }
}
