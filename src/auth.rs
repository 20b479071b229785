//! Authentication module.

use crate::db::{Database, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate a random signing secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose structural email check: one `@`, non-empty parts, a dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Authenticated user ID.
    pub user_id: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Signs and verifies HS256 JSON Web Tokens.
pub struct TokenSigner {
    secret: Vec<u8>,
    lifetime_secs: i64,
}

impl TokenSigner {
    /// Create a signer with the given secret and token lifetime.
    pub fn new(secret: &str, lifetime_hours: u32) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            lifetime_secs: lifetime_hours as i64 * 60 * 60,
        }
    }

    /// Issue a token for `user_id`, valid from now.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, now_timestamp())
    }

    /// Issue a token as if it had been created at `issued_at`.
    pub fn issue_at(&self, user_id: &str, issued_at: i64) -> Result<String> {
        let claims = Claims {
            user_id: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + self.lifetime_secs,
        };

        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };

        let header = serde_json::to_vec(&header)
            .map_err(|e| AppError::Internal(format!("Failed to encode token header: {}", e)))?;
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| AppError::Internal(format!("Failed to encode token claims: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);

        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let malformed = || AppError::Unauthorized("Malformed token".to_string());

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let header: Header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(malformed)?;
        if header.alg != "HS256" {
            return Err(AppError::Unauthorized(format!(
                "Unsupported token algorithm: {}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| malformed())?;

        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AppError::Unauthorized("Invalid token signature".to_string()))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(malformed)?;

        if claims.exp <= now_timestamp() {
            return Err(AppError::Unauthorized("Token expired".to_string()));
        }

        Ok(claims)
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Invalid signing key: {}", e)))
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    signer: TokenSigner,
    min_password_len: usize,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(db: Database, signer: TokenSigner, min_password_len: usize) -> Self {
        Self {
            db,
            signer,
            min_password_len,
        }
    }

    /// Register a new user.
    pub fn signup(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);

        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email address".to_string()));
        }

        if password.chars().count() < self.min_password_len {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_len
            )));
        }

        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(AppError::Conflict(format!(
                "Email '{}' is already registered",
                email
            )));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: hash_password(password)?,
            created_at: now_timestamp(),
        };

        // The UNIQUE constraint still catches a concurrent signup.
        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a token.
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let email = normalize_email(email);

        if email.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Email and password are required".to_string(),
            ));
        }

        let user = self
            .db
            .get_user_by_email(&email)?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            return Err(AppError::Unauthorized("Incorrect password".to_string()));
        }

        let token = self.signer.issue(&user.id)?;
        tracing::debug!(user_id = %user.id, "User logged in");

        Ok((user, token))
    }

    /// Verify a bearer token and return its claims.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        self.signer.verify(token)
    }

    /// Verify a bearer token and resolve it to a stored user.
    ///
    /// A validly signed token whose user no longer exists is rejected.
    pub fn authenticate(&self, token: &str) -> Result<User> {
        let claims = self.signer.verify(token)?;

        self.db
            .get_user_by_id(&claims.user_id)?
            .ok_or_else(|| AppError::Unauthorized("Unknown user".to_string()))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_and_verify() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("same"));
    }

    #[test]
    fn test_generate_secret() {
        let s1 = generate_secret();
        let s2 = generate_secret();

        assert_eq!(s1.len(), 43); // Base64 of 32 bytes
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.org"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@example.com"));
        assert!(!is_valid_email("al ice@example.com"));
        assert!(!is_valid_email("alice@example."));
    }

    #[test]
    fn test_token_roundtrip() {
        let signer = TokenSigner::new("secret", 24);
        let token = signer.issue("user-1").unwrap();

        assert_eq!(token.split('.').count(), 3);
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_token_expired() {
        let signer = TokenSigner::new("secret", 24);
        let issued = now_timestamp() - 24 * 3600 - 1;
        let token = signer.issue_at("user-1", issued).unwrap();

        assert!(matches!(
            signer.verify(&token),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_token_wrong_secret() {
        let token = TokenSigner::new("secret-a", 24).issue("user-1").unwrap();
        let other = TokenSigner::new("secret-b", 24);

        assert!(matches!(other.verify(&token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_token_tampered_payload() {
        let signer = TokenSigner::new("secret", 24);
        let token = signer.issue("user-1").unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = Claims {
            user_id: "admin".to_string(),
            iat: 0,
            exp: i64::MAX,
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(signer.verify(&forged).is_err());
    }

    #[test]
    fn test_token_malformed() {
        let signer = TokenSigner::new("secret", 24);
        assert!(signer.verify("").is_err());
        assert!(signer.verify("abc").is_err());
        assert!(signer.verify("a.b.c").is_err());
        assert!(signer.verify("a.b.c.d").is_err());
    }
}
