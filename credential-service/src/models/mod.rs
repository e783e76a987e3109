mod email_verification_token;
mod password_reset_token;
mod refresh_token;
mod user;

pub use email_verification_token::EmailVerificationToken;
pub use password_reset_token::PasswordResetToken;
pub use refresh_token::RefreshToken;
pub use user::{AuthenticatedUser, DirectoryUser};

use sha2::{Digest, Sha256};

/// SHA-256 of an opaque token, hex-encoded. Only this digest is persisted;
/// lookups hash the presented token and match exactly.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
