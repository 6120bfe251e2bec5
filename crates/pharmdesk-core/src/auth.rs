//! Operator sign-in.
//!
//! Backend error codes map to a fixed set of user-facing messages; raw
//! backend text is never shown. [`LocalAuth`] signs pharmacists in against
//! the local `pharmacists` table.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::{Database, DbError, Pharmacist};

/// Generic message for anything without a dedicated one.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred. Please try again.";

/// Error codes reported by the auth and document backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorCode {
    UserNotFound,
    WrongPassword,
    InvalidEmail,
    TooManyRequests,
    NetworkRequestFailed,
    EmailAlreadyInUse,
    PermissionDenied,
    Unavailable,
    NotFound,
    Unknown(String),
}

impl AuthErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "auth/user-not-found" => AuthErrorCode::UserNotFound,
            "auth/wrong-password" => AuthErrorCode::WrongPassword,
            "auth/invalid-email" => AuthErrorCode::InvalidEmail,
            "auth/too-many-requests" => AuthErrorCode::TooManyRequests,
            "auth/network-request-failed" => AuthErrorCode::NetworkRequestFailed,
            "auth/email-already-in-use" => AuthErrorCode::EmailAlreadyInUse,
            "permission-denied" => AuthErrorCode::PermissionDenied,
            "unavailable" => AuthErrorCode::Unavailable,
            "not-found" => AuthErrorCode::NotFound,
            other => AuthErrorCode::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            AuthErrorCode::UserNotFound => "auth/user-not-found",
            AuthErrorCode::WrongPassword => "auth/wrong-password",
            AuthErrorCode::InvalidEmail => "auth/invalid-email",
            AuthErrorCode::TooManyRequests => "auth/too-many-requests",
            AuthErrorCode::NetworkRequestFailed => "auth/network-request-failed",
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::PermissionDenied => "permission-denied",
            AuthErrorCode::Unavailable => "unavailable",
            AuthErrorCode::NotFound => "not-found",
            AuthErrorCode::Unknown(code) => code,
        }
    }

    /// Message shown to the operator. Never includes backend text.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthErrorCode::UserNotFound | AuthErrorCode::WrongPassword => {
                "Invalid email or password. Please try again."
            }
            AuthErrorCode::InvalidEmail => "Invalid email format.",
            AuthErrorCode::TooManyRequests => {
                "Too many failed login attempts. Please try again later."
            }
            AuthErrorCode::NetworkRequestFailed => {
                "Network error. Please check your internet connection."
            }
            AuthErrorCode::EmailAlreadyInUse => {
                "This email is already in use. Please use a different email."
            }
            AuthErrorCode::PermissionDenied => "You do not have permission to access this data.",
            AuthErrorCode::Unavailable => {
                "The service is currently unavailable. Please try again later."
            }
            AuthErrorCode::NotFound => "The requested document was not found.",
            AuthErrorCode::Unknown(_) => GENERIC_ERROR_MESSAGE,
        }
    }
}

/// Auth errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Auth error: {}", .0.code())]
    Code(AuthErrorCode),

    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl AuthError {
    /// Message shown to the operator.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::Code(code) => code.user_message(),
            AuthError::MissingCredentials => "Please enter both email and password.",
            AuthError::Database(DbError::NotFound(_)) => AuthErrorCode::NotFound.user_message(),
            AuthError::Database(_) => AuthErrorCode::Unavailable.user_message(),
        }
    }
}

impl From<AuthErrorCode> for AuthError {
    fn from(code: AuthErrorCode) -> Self {
        AuthError::Code(code)
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// The signed-in pharmacist.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub uid: String,
    pub email: String,
    pub name: String,
}

impl From<Pharmacist> for Operator {
    fn from(p: Pharmacist) -> Self {
        Self {
            uid: p.id,
            email: p.email,
            name: p.name,
        }
    }
}

/// Something that can check operator credentials.
pub trait AuthProvider {
    fn sign_in(&self, email: &str, password: &str) -> AuthResult<Operator>;

    fn sign_out(&self) -> AuthResult<()> {
        Ok(())
    }
}

/// Current operator, if any.
#[derive(Debug, Default)]
pub struct Session {
    current: Option<Operator>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign in through a provider. A failed attempt leaves the session as it was.
    pub fn sign_in<P: AuthProvider + ?Sized>(
        &mut self,
        provider: &P,
        email: &str,
        password: &str,
    ) -> AuthResult<&Operator> {
        let operator = provider.sign_in(email, password)?;
        Ok(self.establish(operator))
    }

    /// Make an already authenticated operator current, replacing any other.
    pub fn establish(&mut self, operator: Operator) -> &Operator {
        if let Some(previous) = self.current.as_ref().filter(|p| p.uid != operator.uid) {
            tracing::info!(uid = %previous.uid, "Operator replaced");
        }
        tracing::info!(uid = %operator.uid, "Operator signed in");
        self.current.insert(operator)
    }

    pub fn sign_out<P: AuthProvider + ?Sized>(&mut self, provider: &P) -> AuthResult<()> {
        provider.sign_out()?;
        if let Some(operator) = self.current.take() {
            tracing::info!(uid = %operator.uid, "Operator signed out");
        }
        Ok(())
    }

    pub fn current(&self) -> Option<&Operator> {
        self.current.as_ref()
    }
}

/// Email/password sign-in against the local pharmacist table.
pub struct LocalAuth<'a> {
    db: &'a Database,
    max_attempts: u32,
}

impl<'a> LocalAuth<'a> {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Consecutive failures allowed before sign-in is refused.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Create a pharmacist account.
    pub fn register_pharmacist(&self, email: &str, name: &str, password: &str) -> AuthResult<Operator> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if !is_valid_email(email) {
            return Err(AuthErrorCode::InvalidEmail.into());
        }

        let salt = uuid::Uuid::new_v4().simple().to_string();
        let pharmacist = Pharmacist {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.trim().to_string(),
            password_hash: hash_password(&salt, password),
            password_salt: salt,
            failed_attempts: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        match self.db.insert_pharmacist(&pharmacist) {
            Ok(()) => {}
            Err(DbError::Constraint(_)) => return Err(AuthErrorCode::EmailAlreadyInUse.into()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(uid = %pharmacist.id, "Pharmacist registered");
        Ok(pharmacist.into())
    }

    /// Clear a throttled account's failure count.
    pub fn unlock(&self, email: &str) -> AuthResult<()> {
        let pharmacist = self
            .db
            .find_pharmacist_by_email(email)?
            .ok_or(AuthErrorCode::UserNotFound)?;
        self.db.reset_failed_signins(&pharmacist.id)?;
        tracing::info!(uid = %pharmacist.id, "Sign-in unlocked");
        Ok(())
    }
}

impl AuthProvider for LocalAuth<'_> {
    fn sign_in(&self, email: &str, password: &str) -> AuthResult<Operator> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if !is_valid_email(email) {
            return Err(AuthErrorCode::InvalidEmail.into());
        }

        let pharmacist = self
            .db
            .find_pharmacist_by_email(email)?
            .ok_or(AuthErrorCode::UserNotFound)?;

        if pharmacist.failed_attempts >= self.max_attempts {
            tracing::warn!(uid = %pharmacist.id, "Sign-in refused after repeated failures");
            return Err(AuthErrorCode::TooManyRequests.into());
        }

        if hash_password(&pharmacist.password_salt, password) != pharmacist.password_hash {
            let attempts = self.db.record_failed_signin(&pharmacist.id)?;
            tracing::warn!(uid = %pharmacist.id, attempts, "Failed sign-in");
            return Err(AuthErrorCode::WrongPassword.into());
        }

        self.db.reset_failed_signins(&pharmacist.id)?;
        Ok(pharmacist.into())
    }
}

/// Hex SHA-256 of `salt:password`.
fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// `local@domain.tld`, no whitespace.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
                    .unwrap_or(false)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_code_round_trip_and_messages() {
        for code in [
            "auth/user-not-found",
            "auth/wrong-password",
            "auth/invalid-email",
            "auth/too-many-requests",
            "auth/network-request-failed",
            "auth/email-already-in-use",
            "permission-denied",
            "unavailable",
            "not-found",
        ] {
            assert_eq!(AuthErrorCode::from_code(code).code(), code);
        }

        assert_eq!(
            AuthErrorCode::from_code("auth/user-not-found").user_message(),
            AuthErrorCode::from_code("auth/wrong-password").user_message()
        );
        assert_eq!(
            AuthErrorCode::from_code("auth/internal-error: stack trace").user_message(),
            GENERIC_ERROR_MESSAGE
        );
    }

    #[test]
    fn test_register_and_sign_in() {
        let db = setup();
        let auth = LocalAuth::new(&db);
        let registered = auth
            .register_pharmacist("dana@pharmacy.test", "Dana Reyes", "s3cret")
            .unwrap();

        let mut session = Session::new();
        let operator = session
            .sign_in(&auth, "DANA@pharmacy.test", "s3cret")
            .unwrap()
            .clone();
        assert_eq!(operator.uid, registered.uid);
        assert_eq!(session.current(), Some(&operator));

        session.sign_out(&auth).unwrap();
        assert!(session.current().is_none());
    }

    #[test]
    fn test_sign_in_errors() {
        let db = setup();
        let auth = LocalAuth::new(&db);
        auth.register_pharmacist("dana@pharmacy.test", "Dana", "s3cret")
            .unwrap();

        let err = auth.sign_in("nobody@pharmacy.test", "x").unwrap_err();
        assert!(matches!(err, AuthError::Code(AuthErrorCode::UserNotFound)));

        let err = auth.sign_in("dana@pharmacy.test", "wrong").unwrap_err();
        assert_eq!(err.user_message(), "Invalid email or password. Please try again.");

        let err = auth.sign_in("not-an-email", "x").unwrap_err();
        assert_eq!(err.user_message(), "Invalid email format.");

        let err = auth.sign_in("", "").unwrap_err();
        assert_eq!(err.user_message(), "Please enter both email and password.");
    }

    #[test]
    fn test_throttle_after_repeated_failures() {
        let db = setup();
        let auth = LocalAuth::new(&db).with_max_attempts(2);
        auth.register_pharmacist("dana@pharmacy.test", "Dana", "s3cret")
            .unwrap();

        assert!(auth.sign_in("dana@pharmacy.test", "bad").is_err());
        assert!(auth.sign_in("dana@pharmacy.test", "bad").is_err());

        let err = auth.sign_in("dana@pharmacy.test", "s3cret").unwrap_err();
        assert!(matches!(err, AuthError::Code(AuthErrorCode::TooManyRequests)));

        auth.unlock("dana@pharmacy.test").unwrap();
        assert!(auth.sign_in("dana@pharmacy.test", "s3cret").is_ok());
        assert!(matches!(
            auth.unlock("nobody@pharmacy.test"),
            Err(AuthError::Code(AuthErrorCode::UserNotFound))
        ));
    }

    #[test]
    fn test_failed_sign_in_keeps_current_operator() {
        let db = setup();
        let auth = LocalAuth::new(&db);
        auth.register_pharmacist("dana@pharmacy.test", "Dana", "s3cret")
            .unwrap();
        let other = auth
            .register_pharmacist("lee@pharmacy.test", "Lee", "hunter2")
            .unwrap();

        let mut session = Session::new();
        let dana = session
            .sign_in(&auth, "dana@pharmacy.test", "s3cret")
            .unwrap()
            .clone();

        assert!(session.sign_in(&auth, "lee@pharmacy.test", "wrong").is_err());
        assert_eq!(session.current(), Some(&dana));

        assert_eq!(session.establish(other.clone()), &other);
        assert_eq!(session.current().map(|o| o.uid.as_str()), Some(other.uid.as_str()));
    }

    #[test]
    fn test_success_resets_counter() {
        let db = setup();
        let auth = LocalAuth::new(&db).with_max_attempts(2);
        auth.register_pharmacist("dana@pharmacy.test", "Dana", "s3cret")
            .unwrap();

        assert!(auth.sign_in("dana@pharmacy.test", "bad").is_err());
        assert!(auth.sign_in("dana@pharmacy.test", "s3cret").is_ok());
        assert!(auth.sign_in("dana@pharmacy.test", "bad").is_err());
        assert!(auth.sign_in("dana@pharmacy.test", "s3cret").is_ok());
    }

    #[test]
    fn test_duplicate_registration() {
        let db = setup();
        let auth = LocalAuth::new(&db);
        auth.register_pharmacist("dana@pharmacy.test", "Dana", "a")
            .unwrap();

        let err = auth
            .register_pharmacist("Dana@Pharmacy.test", "Other", "b")
            .unwrap_err();
        assert_eq!(
            err.user_message(),
            "This email is already in use. Please use a different email."
        );
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.co"));
        assert!(!is_valid_email("a@@b.co"));
    }
}
