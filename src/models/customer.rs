use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Marketplace profile attached 1:1 to a user account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub user_id: i64,
    pub phone: Option<String>,
    pub street_address: Option<String>,
}
