use async_trait::async_trait;

use super::{PrincipalsError, PrincipalsResolver, Resolution};
use crate::context::AuthContext;
use crate::request::SignRequest;

/// Uses the submitted username as the only principal.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserResolver;

#[async_trait]
impl PrincipalsResolver for UserResolver {
    fn name(&self) -> &str {
        "user"
    }

    async fn resolve(
        &self,
        _ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Resolution, PrincipalsError> {
        if request.user.is_empty() {
            return Ok(Resolution::NotFound("empty username".into()));
        }
        Ok(Resolution::Found(vec![request.user.clone()]))
    }
}
