//! bcrypt hashing, run on the blocking pool so request workers never stall
//! on key stretching.

use crate::services::ServiceError;

pub async fn hash_password(password: &str, cost: u32) -> Result<String, ServiceError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing task failed: {}", e)))?
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))
}

/// `Ok(false)` on mismatch and on hashes bcrypt cannot parse.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, ServiceError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let result = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Password verification task failed: {}", e))
        })?;

    match result {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash could not be verified");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("pw123456", 4).await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("pw123456", &hash).await.unwrap());
        assert!(!verify_password("wrong-password", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_hash_is_a_mismatch() {
        assert!(!verify_password("pw123456", "not-a-bcrypt-hash").await.unwrap());
    }
}
