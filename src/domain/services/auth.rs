//! Authentication Service
//!
//! Verifies the configured account's password and issues / verifies HS256
//! bearer tokens.

use crate::domain::entities::{Claims, UserAccount};
use crate::domain::value_objects::Role;
use crate::error::AppError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Hash a plaintext password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {}", e)))
}

/// Issues and verifies signed bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Issue a token for `account`, valid for the configured lifetime.
    pub fn issue(&self, account: &UserAccount) -> Result<String, AppError> {
        let now = Self::now_secs();
        let claims = Claims {
            sub: account.id.to_string(),
            username: account.username.clone(),
            role: account.role,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Verify a token's signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                    other => tracing::debug!("rejected token: {:?}", other),
                }
                AppError::unauthorized("Invalid or expired token")
            })
    }
}

/// Credential verification plus token issuance for the login endpoint.
#[derive(Clone)]
pub struct AuthService {
    account: UserAccount,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(account: UserAccount, tokens: TokenService) -> Self {
        Self { account, tokens }
    }

    /// Build the account from a plaintext password.
    ///
    /// Hashing is expensive; callers on the async runtime should do this
    /// once at startup.
    pub fn with_password(
        username: &str,
        password: &str,
        role: Role,
        tokens: TokenService,
    ) -> Result<Self, AppError> {
        let account = UserAccount {
            id: 1,
            username: username.to_string(),
            password_hash: hash_password(password)?,
            role,
        };
        Ok(Self::new(account, tokens))
    }

    /// Build the account from a pre-computed Argon2 PHC hash.
    pub fn with_hash(
        username: &str,
        password_hash: &str,
        role: Role,
        tokens: TokenService,
    ) -> Result<Self, AppError> {
        PasswordHash::new(password_hash)
            .map_err(|e| AppError::Internal(format!("invalid password hash: {}", e)))?;
        let account = UserAccount {
            id: 1,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            role,
        };
        Ok(Self::new(account, tokens))
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn account(&self) -> &UserAccount {
        &self.account
    }

    /// Check a username/password pair and issue a token.
    ///
    /// Runs Argon2 verification, so call it from a blocking context.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AppError> {
        if username != self.account.username {
            return Err(AppError::unauthorized("Invalid credentials"));
        }

        let parsed = PasswordHash::new(&self.account.password_hash)
            .map_err(|e| AppError::Internal(format!("stored password hash is invalid: {}", e)))?;

        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(AppError::unauthorized("Invalid credentials"));
        }

        tracing::info!("issued token for user {}", self.account.username);
        self.tokens.issue(&self.account)
    }

    /// Verify a bearer token.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        self.tokens.verify(token)
    }
}
