use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::services::errors::token_service_errors::TokenServiceError;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String, // user ID
    pub exp: usize,
    pub iat: usize,
}

/// Verifies bearer tokens issued by the identity provider. Tokens are never
/// minted here outside tests.
pub struct TokenService {
    decoding_key: DecodingKey,
    validation: Validation,
    #[cfg(test)]
    jwt_secret: String,
}

impl TokenService {
    pub fn new(jwt_secret: &str) -> Self {
        TokenService {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            #[cfg(test)]
            jwt_secret: jwt_secret.to_string(),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenClaims, TokenServiceError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenServiceError::ExpiredToken,
                _ => TokenServiceError::InvalidToken,
            })
    }

    pub fn extract_user_id_from_token(&self, token: &str) -> Result<String, TokenServiceError> {
        let claims = self.verify_token(token)?;
        if claims.sub.trim().is_empty() {
            return Err(TokenServiceError::InvalidToken);
        }
        Ok(claims.sub)
    }

    #[cfg(test)]
    pub fn generate_token(&self, user_id: &str, ttl: chrono::Duration) -> String {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = chrono::Utc::now();
        let claims = TokenClaims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp().max(0) as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .unwrap()
    }
}
