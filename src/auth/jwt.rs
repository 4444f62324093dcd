use std::time::{SystemTime, UNIX_EPOCH};

use crate::{model::role::Role, models::Claims};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

pub fn generate_token(
    user_id: i64,
    name: &str,
    email: &str,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let issued_at = now();
    let claims = Claims {
        sub: user_id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        role,
        iat: issued_at,
        exp: issued_at + ttl,
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let token = generate_token(7, "Owner", "owner@parlour.example", Role::SuperAdmin, "k1", 60)
            .unwrap();
        let claims = verify_token(&token, "k1").unwrap();

        assert_eq!(claims.sub, "7");
        assert_eq!(claims.role, Role::SuperAdmin);
        assert_eq!(claims.email, "owner@parlour.example");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_token(7, "Owner", "o@p.example", Role::Admin, "k1", 60).unwrap();
        assert!(verify_token(&token, "k2").is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_token("not-a-jwt", "k1").is_err());
    }
}
