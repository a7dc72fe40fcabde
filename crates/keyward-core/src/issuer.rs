//! The issuance pipeline: authenticate, resolve principals, sign.
//!
//! Every failure is collapsed into [`IssueError`], whose
//! [`public_message`](IssueError::public_message) is all a client ever
//! sees. The detailed cause is logged here.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::authn::{AuthnError, Authenticator};
use crate::config::ServiceConfig;
use crate::context::AuthContext;
use crate::principals::{PrincipalsError, PrincipalsResolver, Resolution};
use crate::registry;
use crate::request::{CertRequest, RequestError, SignRequest};
use crate::signer::{SignError, Signer};
use crate::ConfigError;

/// A certificate and what went into it.
#[derive(Debug, Clone)]
pub struct Issued {
    /// OpenSSH certificate text.
    pub certificate: String,
    /// Key id written into the certificate.
    pub identity: String,
    /// Principals in resolver order.
    pub principals: Vec<String>,
}

/// Why a request did not produce a certificate.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// A required request field is empty.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// The account has a second factor and the request carried no code.
    #[error("otp required but not provided")]
    OtpRequired,

    #[error("login failed: {0}")]
    LoginFailed(#[source] AuthnError),

    /// Every resolver returned `NotFound` or an empty list.
    #[error("no principals found")]
    NoPrincipalsFound,

    /// A resolver failed hard; later resolvers did not run.
    #[error("principals resolver {resolver} failed: {source}")]
    Principals {
        resolver: String,
        #[source]
        source: PrincipalsError,
    },

    /// The signer refused the request or failed to build the certificate.
    #[error("signing failed: {0}")]
    Signing(#[source] SignError),

    /// The signing backend could not be reached.
    #[error("CA unavailable: {0}")]
    CaUnavailable(#[source] SignError),

    /// The caller gave up before signing started.
    #[error("request cancelled")]
    Cancelled,
}

impl IssueError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Signing(_) => StatusCode::BAD_REQUEST,
            Self::OtpRequired
            | Self::LoginFailed(_)
            | Self::NoPrincipalsFound
            | Self::Principals { .. } => StatusCode::UNAUTHORIZED,
            Self::CaUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to return to a client. Never includes backend detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "missing field(s) in signing request",
            Self::OtpRequired => "otp required but not provided",
            Self::LoginFailed(_) => "login failed",
            Self::NoPrincipalsFound => "no principals found",
            Self::Principals { .. } => "error getting list of principals",
            Self::Signing(_) => "unknown server error during key signing",
            Self::CaUnavailable(_) => "error getting CA certificate",
            Self::Cancelled => "request cancelled",
        }
    }

    fn from_sign(err: SignError) -> Self {
        match err {
            SignError::Unavailable(_) => Self::CaUnavailable(err),
            other => Self::Signing(other),
        }
    }
}

/// Runs the pipeline against one authenticator, an ordered list of
/// resolvers and one signer. Cheap to share: wrap it in an `Arc`.
pub struct Issuer {
    authenticator: Arc<dyn Authenticator>,
    resolvers: Vec<Arc<dyn PrincipalsResolver>>,
    signer: Arc<dyn Signer>,
}

impl fmt::Debug for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Issuer")
            .field("authenticator", &self.authenticator.name())
            .field(
                "resolvers",
                &self.resolvers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("signer", &self.signer.name())
            .finish()
    }
}

impl Issuer {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        resolvers: Vec<Arc<dyn PrincipalsResolver>>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self, ConfigError> {
        if resolvers.is_empty() {
            return Err(ConfigError::NoResolvers);
        }
        Ok(Self {
            authenticator,
            resolvers,
            signer,
        })
    }

    /// Builds every backend named in `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        Self::new(
            registry::build_authenticator(&config.authenticator)?,
            registry::build_resolvers(&config.principals)?,
            registry::build_signer(&config.signer)?,
        )
    }

    /// Issues a certificate for `request`.
    ///
    /// Dropping the returned future aborts any backend call in flight.
    pub async fn issue(&self, request: SignRequest) -> Result<Issued, IssueError> {
        self.run(&request, None).await
    }

    /// Like [`issue`](Self::issue), but stops with [`IssueError::Cancelled`]
    /// if `cancel` fires during authentication or principal resolution.
    ///
    /// Once the signer has been called it runs to completion, so a
    /// certificate the backend already issued is still returned.
    pub async fn issue_with_cancel(
        &self,
        request: SignRequest,
        cancel: &CancellationToken,
    ) -> Result<Issued, IssueError> {
        self.run(&request, Some(cancel)).await
    }

    async fn run(
        &self,
        request: &SignRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<Issued, IssueError> {
        request.validate()?;

        let authenticated =
            match until_cancelled(cancel, self.authenticator.authenticate(request)).await? {
                Ok(authenticated) => authenticated,
                Err(AuthnError::OtpRequired) => {
                    info!(user = %request.user, "otp required but not provided");
                    return Err(IssueError::OtpRequired);
                }
                Err(err) => {
                    warn!(
                        user = %request.user,
                        authenticator = self.authenticator.name(),
                        error = %err,
                        "login failed"
                    );
                    return Err(IssueError::LoginFailed(err));
                }
            };

        let principals = until_cancelled(
            cancel,
            self.resolve_principals(&authenticated.context, request),
        )
        .await??;

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(IssueError::Cancelled);
        }

        let cert_request = CertRequest {
            public_key: request.public_key.clone(),
            id: authenticated.identity.clone(),
            principals: principals.clone(),
        };
        let certificate = self.signer.sign(&cert_request).await.map_err(|err| {
            error!(
                user = %request.user,
                signer = self.signer.name(),
                error = %err,
                "signing failed"
            );
            IssueError::from_sign(err)
        })?;

        info!(
            key_id = %authenticated.identity,
            principals = ?principals,
            "certificate issued"
        );
        Ok(Issued {
            certificate,
            identity: authenticated.identity,
            principals,
        })
    }

    /// Runs every resolver in order and concatenates what they find.
    ///
    /// `NotFound` moves on to the next resolver; an error stops at once.
    pub async fn resolve_principals(
        &self,
        ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Vec<String>, IssueError> {
        let mut principals = Vec::new();
        for resolver in &self.resolvers {
            match resolver.resolve(ctx, request).await {
                Ok(Resolution::Found(found)) => principals.extend(found),
                Ok(Resolution::NotFound(reason)) => {
                    info!(
                        user = %request.user,
                        resolver = resolver.name(),
                        reason = %reason,
                        "no principals from resolver"
                    );
                }
                Err(source) => {
                    error!(
                        user = %request.user,
                        resolver = resolver.name(),
                        error = %source,
                        "principals resolution failed"
                    );
                    return Err(IssueError::Principals {
                        resolver: resolver.name().to_string(),
                        source,
                    });
                }
            }
        }

        if principals.is_empty() {
            warn!(user = %request.user, "no principals found");
            return Err(IssueError::NoPrincipalsFound);
        }
        Ok(principals)
    }

    /// The CA public key in OpenSSH format.
    pub async fn ca_public_key(&self) -> Result<String, IssueError> {
        self.signer.read_ca().await.map_err(|err| {
            error!(signer = self.signer.name(), error = %err, "error reading CA");
            IssueError::CaUnavailable(err)
        })
    }
}

/// Awaits `fut`, giving up with [`IssueError::Cancelled`] when `cancel` fires.
async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    fut: F,
) -> Result<F::Output, IssueError> {
    match cancel {
        None => Ok(fut.await),
        Some(cancel) => tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IssueError::Cancelled),
            output = fut => Ok(output),
        },
    }
}
