use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TripType {
    pub id: i64,
    pub name: String,
}

/// A sellable listing. Prices are stored as integer cents; `quantity` is
/// the remaining stock and only ever changes when an order is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trip {
    pub id: i64,
    pub seller_id: i64,
    pub trip_type_id: i64,
    pub title: String,
    pub description: String,
    pub location: String,
    pub num_of_nights: i64,
    pub price_cents: i64,
    pub quantity: i64,
    pub quantity_sold: i64,
    pub image: Option<String>,
}

impl Trip {
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }

    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }
}

/// Renders cents as a two-decimal amount, e.g. 1098 -> "10.98".
pub fn format_cents(cents: i64) -> String {
    Decimal::new(cents, 2).to_string()
}

/// Parses a user-supplied amount ("3", "3.5", "3.50") into cents.
/// Rejects negative amounts and more than two decimal places.
pub fn parse_amount(input: &str) -> Option<i64> {
    let amount = Decimal::from_str(input.trim()).ok()?;
    if amount.is_sign_negative() || amount.scale() > 2 {
        return None;
    }
    (amount * Decimal::ONE_HUNDRED).to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_cents_with_two_places() {
        assert_eq!(format_cents(1098), "10.98");
        assert_eq!(format_cents(300), "3.00");
        assert_eq!(format_cents(0), "0.00");
    }

    #[test]
    fn parses_amounts_into_cents() {
        assert_eq!(parse_amount("1.99"), Some(199));
        assert_eq!(parse_amount("3"), Some(300));
        assert_eq!(parse_amount(" 5.99 "), Some(599));
        assert_eq!(parse_amount("-1.00"), None);
        assert_eq!(parse_amount("1.999"), None);
        assert_eq!(parse_amount("abc"), None);
    }
}
