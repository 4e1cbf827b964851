use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A trip bookmarked from its detail page. Unrelated to the cart.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WishlistItem {
    pub id: i64,
    pub trip_id: i64,
    pub customer_id: i64,
    pub note: Option<String>,
}
