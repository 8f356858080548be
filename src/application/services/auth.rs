//! Auth/User Service
//!
//! Handlers behind the auth and user queues: registration with email
//! OTP verification, login/logout with a single-active-session rule,
//! and profile lookup for other services.
//!
//! All methods return the `{success, status, message, ...}` reply body
//! the gateway translates onto HTTP; modeled failures come back as
//! typed errors that the queue consumer turns into error-shaped replies.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::domain::{AccountStatus, User, UserRepository};
use crate::infrastructure::broker::RpcClient;
use crate::infrastructure::cache::Cache;
use crate::shared::error::AppError;

/// JWT claims issued on login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Account role
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterData {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpData {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailData {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UserIdData {
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}

/// OTP time-to-live, seconds.
const OTP_TTL_SECS: u64 = 5 * 60;
/// Minimum interval between OTP issues per address, seconds.
const OTP_RESEND_INTERVAL_SECS: u64 = 60;

/// Auth/user service behind `auth.queue` and `user.queue`.
pub struct AuthService<U, C>
where
    U: UserRepository,
    C: Cache,
{
    users: Arc<U>,
    cache: Arc<C>,
    rpc: Arc<RpcClient>,
    jwt: JwtSettings,
    mail_queue: String,
}

impl<U, C> AuthService<U, C>
where
    U: UserRepository,
    C: Cache,
{
    pub fn new(
        users: Arc<U>,
        cache: Arc<C>,
        rpc: Arc<RpcClient>,
        jwt: JwtSettings,
        mail_queue: String,
    ) -> Self {
        Self {
            users,
            cache,
            rpc,
            jwt,
            mail_queue,
        }
    }

    /// Create a pending account and mail its verification code.
    pub async fn register(&self, data: RegisterData) -> Result<Value, AppError> {
        if self.users.find_by_email(&data.email).await?.is_some() {
            return Err(AppError::BadRequest("User already exists".into()));
        }

        let password_hash = hash_password(&data.password)?;
        let user = self
            .users
            .create(&User::new(data.name.clone(), data.email.clone(), password_hash))
            .await?;

        let otp = self.issue_otp(&data.email).await?;
        self.send_otp_mail(&data.email, &data.name, &otp).await?;

        info!(user_id = %user.id, "user registered");
        Ok(json!({
            "success": true,
            "status": 201,
            "message": "User registered successfully",
            "data": user.public_profile(),
        }))
    }

    /// Verify credentials and issue a token. A user with a live session
    /// must log out before logging in again.
    pub async fn login(&self, data: LoginData) -> Result<Value, AppError> {
        let user = self
            .users
            .find_by_email(&data.email)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        if !verify_password(&data.password, &user.password_hash)? {
            return Err(AppError::BadRequest("Invalid password".into()));
        }
        if !user.is_active() {
            return Err(AppError::Forbidden("Account not verified".into()));
        }

        let login_key = format!("login:{}", data.email);
        if self.cache.exists(&login_key).await? {
            return Err(AppError::BadRequest("User already logged in".into()));
        }

        let token = self.sign_token(&user)?;
        let session_ttl = (self.jwt.token_expiry_days as u64) * 24 * 60 * 60;
        self.cache.set_ex(&login_key, &1_u8, session_ttl).await?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "Logged in successfully",
            "token": token,
            "data": user.public_profile(),
        }))
    }

    /// Activate the account matching a previously issued OTP.
    pub async fn verify_otp(&self, data: VerifyOtpData) -> Result<Value, AppError> {
        let otp_key = format!("otp:{}", data.email);
        let stored: Option<String> = self.cache.get(&otp_key).await?;
        if stored.as_deref() != Some(data.otp.as_str()) {
            return Err(AppError::BadRequest("Invalid OTP".into()));
        }

        if self.users.find_by_email(&data.email).await?.is_none() {
            return Err(AppError::NotFound("User not found".into()));
        }
        self.users
            .set_status(&data.email, AccountStatus::Active)
            .await?;
        self.cache.delete(&otp_key).await?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "OTP verified",
        }))
    }

    /// Issue a fresh OTP and mail it, subject to the resend rate limit.
    pub async fn resend_otp(&self, data: EmailData) -> Result<Value, AppError> {
        let otp = self.issue_otp(&data.email).await?;
        self.send_otp_mail(&data.email, "", &otp).await?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "OTP resent",
        }))
    }

    /// Clear the user's live session.
    pub async fn logout(&self, data: EmailData) -> Result<Value, AppError> {
        if self.users.find_by_email(&data.email).await?.is_none() {
            return Err(AppError::NotFound("User not found".into()));
        }

        let login_key = format!("login:{}", data.email);
        if !self.cache.exists(&login_key).await? {
            return Err(AppError::BadRequest("User not logged in".into()));
        }
        self.cache.delete(&login_key).await?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "Logged out successfully",
        }))
    }

    /// Profile lookup for other services (`user.queue`).
    pub async fn get_user_by_id(&self, data: UserIdData) -> Result<Value, AppError> {
        let user = self
            .users
            .find_by_id(data.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;

        Ok(json!({
            "success": true,
            "status": 200,
            "message": "User found",
            "data": user.public_profile(),
        }))
    }

    async fn issue_otp(&self, email: &str) -> Result<String, AppError> {
        let rate_key = format!("otp:ratelimit:{email}");
        if self.cache.exists(&rate_key).await? {
            return Err(AppError::RateLimited);
        }

        let otp = format!("{:06}", rand::rng().random_range(0..1_000_000));
        self.cache
            .set_ex(&format!("otp:{email}"), &otp, OTP_TTL_SECS)
            .await?;
        self.cache
            .set_ex(&rate_key, &1_u8, OTP_RESEND_INTERVAL_SECS)
            .await?;
        Ok(otp)
    }

    /// Fire the welcome/OTP mail through the mail service. A mail-side
    /// failure is reported to the caller as an upstream error, not
    /// swallowed.
    async fn send_otp_mail(&self, email: &str, name: &str, otp: &str) -> Result<(), AppError> {
        let greeting = if name.is_empty() {
            "Welcome to Say Hi.".to_string()
        } else {
            format!("Welcome to Say Hi {name}.")
        };
        let payload = json!({
            "to": email,
            "subject": "Welcome to Say Hi",
            "body": format!("{greeting} Your OTP is {otp}."),
        });

        match self.rpc.call(&self.mail_queue, "send_mail", payload).await {
            Ok(reply) if reply.get("success").and_then(Value::as_bool).unwrap_or(false) => Ok(()),
            Ok(reply) => Err(AppError::Upstream(
                reply
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("mail service rejected the request")
                    .to_string(),
            )),
            Err(e) => Err(AppError::Upstream(format!("mail service: {e}"))),
        }
    }

    fn sign_token(&self, user: &User) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::days(self.jwt.token_expiry_days)).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("stored hash unreadable: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("hunter2!").unwrap();
        assert!(verify_password("hunter2!", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn claims_expire_after_issue() {
        let claims = Claims {
            sub: Uuid::nil().to_string(),
            role: "user".into(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + chrono::Duration::days(7)).timestamp(),
        };
        assert!(claims.exp > claims.iat);
    }
}
