//! Bearer-JWT validation against the configured issuer and audience.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use seismonet_core::config::JwtConfig;

use crate::error::ApiError;

/// Role claim; ordering encodes privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

/// Claims the trust anchor issues. Token issuance is out of scope; the API
/// only validates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iss: String,
    pub aud: String,
    pub exp: u64,
}

/// Validate the bearer token and require at least `min_role`.
pub fn authorize(headers: &HeaderMap, jwt: &JwtConfig, min_role: Role) -> Result<Claims, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("authorization is not a bearer token"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&jwt.issuer]);
    validation.set_audience(&[&jwt.audience]);

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::unauthorized(format!("token rejected: {}", e)))?;

    if data.claims.role < min_role {
        return Err(ApiError::forbidden(format!(
            "requires {:?} or higher",
            min_role
        )));
    }
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret".to_string(),
            issuer: "seismonet".to_string(),
            audience: "seismonet-api".to_string(),
        }
    }

    fn token(role: Role, secret: &str, issuer: &str) -> String {
        let claims = Claims {
            sub: "ops@example".to_string(),
            role,
            iss: issuer.to_string(),
            aud: "seismonet-api".to_string(),
            exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_viewer_token_passes() {
        let jwt = jwt_config();
        let headers = headers_with(&token(Role::Viewer, "test-secret", "seismonet"));
        let claims = authorize(&headers, &jwt, Role::Viewer).unwrap();
        assert_eq!(claims.role, Role::Viewer);
    }

    #[test]
    fn viewer_cannot_act_as_operator() {
        let jwt = jwt_config();
        let headers = headers_with(&token(Role::Viewer, "test-secret", "seismonet"));
        assert!(authorize(&headers, &jwt, Role::Operator).is_err());
    }

    #[test]
    fn admin_outranks_operator() {
        let jwt = jwt_config();
        let headers = headers_with(&token(Role::Admin, "test-secret", "seismonet"));
        assert!(authorize(&headers, &jwt, Role::Operator).is_ok());
    }

    #[test]
    fn wrong_secret_or_issuer_is_rejected() {
        let jwt = jwt_config();
        let bad_secret = headers_with(&token(Role::Admin, "other-secret", "seismonet"));
        assert!(authorize(&bad_secret, &jwt, Role::Viewer).is_err());
        let bad_issuer = headers_with(&token(Role::Admin, "test-secret", "intruder"));
        assert!(authorize(&bad_issuer, &jwt, Role::Viewer).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        let jwt = jwt_config();
        assert!(authorize(&HeaderMap::new(), &jwt, Role::Viewer).is_err());
    }
}
