use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::models::user::Claims;
use crate::state::AppState;

fn decode_claims(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims =
        decode_claims(token, &state.jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Downstream handlers read the caller's identity from extensions
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_signed_with(secret: &str) -> String {
        let claims = Claims {
            sub: 7,
            username: "brian".to_string(),
            role: Role::Student,
            exp: 4102444800,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_ref()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_token_signed_with_configured_secret() {
        let token = token_signed_with("configured-secret");
        let claims = decode_claims(&token, "configured-secret").unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::Student);
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let token = token_signed_with("another-secret");
        assert!(decode_claims(&token, "configured-secret").is_err());
    }
}
