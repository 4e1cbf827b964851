use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One shopping cart (while `active`) or one placed order (once confirmed).
/// `order_date` and `payment_type_id` stay NULL until confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub order_date: Option<DateTime<Utc>>,
    pub payment_type_id: Option<i64>,
    pub active: bool,
}

/// One unit of one trip on one order. No quantity column: adding the same
/// trip twice produces two rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LineItem {
    pub id: i64,
    pub trip_id: i64,
    pub order_id: i64,
}

/// Line item joined with the trip it references, as the cart and order
/// detail views consume it.
#[derive(Debug, Clone, FromRow)]
pub struct CartLine {
    pub id: i64,
    pub trip_id: i64,
    pub order_id: i64,
    pub title: String,
    pub price_cents: i64,
}
