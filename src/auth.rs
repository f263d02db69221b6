//! Authentication utilities: JWT validation and tenant resolution

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Request, TenantContext};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User email
    pub email: String,
    /// User role (admin, organizer, volunteer)
    pub role: String,
    /// Campaign or organization the user acts for; defaults to the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Resolve the caller's tenant from a NATS request.
///
/// The token is mandatory. Without a `tenant_id` claim the user is its own
/// tenant.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<TenantContext> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    let user_id = Uuid::parse_str(&claims.sub).map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;
    let tenant_id = claims
        .tenant_id
        .as_deref()
        .map(Uuid::parse_str)
        .transpose()
        .map_err(|e| anyhow!("Invalid tenant_id in token: {}", e))?
        .unwrap_or(user_id);

    Ok(TenantContext::new(tenant_id, user_id))
}

// =============================================================================
// Tests
// =============================================================================
