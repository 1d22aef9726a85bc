//! bcrypt hashing.  Both operations are CPU-bound and run on the blocking pool.

use crate::error::ServerError;

pub async fn hash_password(password: String, cost: u32) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ServerError::Internal(format!("hash task failed: {e}")))?
        .map_err(|e| ServerError::Internal(format!("bcrypt hash failed: {e}")))
}

/// `false` for a wrong password and for a malformed stored hash.
pub async fn verify_password(password: String, hash: String) -> Result<bool, ServerError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ServerError::Internal(format!("verify task failed: {e}")))?;
    match verified {
        Ok(ok) => Ok(ok),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash could not be verified");
            Ok(false)
        }
    }
}
