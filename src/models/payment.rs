use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upper bound for a stored payment token.
pub const MAX_ACCOUNT_TOKEN_LEN: usize = 64;
pub const MIN_ACCOUNT_TOKEN_LEN: usize = 8;

/// A stored payment instrument. Holds an opaque bounded token, never a raw
/// account number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentType {
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
    pub account_token: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentType {
    /// Tail of the token for display ("Visa ending in 4242").
    pub fn last_four(&self) -> &str {
        let len = self.account_token.len();
        &self.account_token[len.saturating_sub(4)..]
    }
}

/// Tokens are opaque but bounded: ASCII alphanumerics and dashes,
/// between 8 and 64 characters.
pub fn validate_account_token(token: &str) -> Result<(), String> {
    let len = token.len();
    if !(MIN_ACCOUNT_TOKEN_LEN..=MAX_ACCOUNT_TOKEN_LEN).contains(&len) {
        return Err(format!(
            "payment token must be between {MIN_ACCOUNT_TOKEN_LEN} and {MAX_ACCOUNT_TOKEN_LEN} characters"
        ));
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err("payment token may only contain letters, digits and dashes".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounded_tokens() {
        assert!(validate_account_token("tok-4242424242424242").is_ok());
    }

    #[test]
    fn rejects_out_of_bounds_tokens() {
        assert!(validate_account_token("short").is_err());
        assert!(validate_account_token(&"x".repeat(65)).is_err());
        assert!(validate_account_token("tok 4242").is_err());
    }
}
