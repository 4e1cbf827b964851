use chrono::Utc;
use sqlx::Row;
use tracing::{debug, warn};

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        order::{CartLine, Order},
        payment::PaymentType,
        trip::Trip,
    },
};

/// The cart and order lifecycle.
///
/// Each customer has at most one open cart: an `orders` row with
/// `active = 1`, enforced by a partial unique index. Adding the first item
/// creates the cart; confirming it stamps the order date and payment
/// method, flips `active` off and takes the stock, all in one transaction.
/// Cancelling deletes the open cart and its line items.
#[derive(Clone)]
pub struct CartService {
    db: DbPool,
}

#[derive(Debug, Clone)]
pub struct CartView {
    pub order_id: i64,
    pub lines: Vec<CartLine>,
    pub total_cents: i64,
}

#[derive(Debug, Clone)]
pub struct CheckoutView {
    pub order_id: i64,
    pub total_cents: i64,
    pub payment_types: Vec<PaymentType>,
}

#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: Order,
    pub lines: Vec<CartLine>,
    pub total_cents: i64,
}

impl CartService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Adds one unit of a trip to the customer's cart, creating the cart on
    /// first use. A trip with no remaining stock is skipped without error.
    pub async fn add_trip_to_order(&self, customer_id: i64, trip_id: i64) -> Result<(), AppError> {
        let trip = self.fetch_trip(trip_id).await?;
        let order = self.active_order(customer_id).await?;

        if !trip.in_stock() {
            debug!(trip_id, order_id = order.id, "trip out of stock, nothing added");
            return Ok(());
        }

        sqlx::query("INSERT INTO line_items (trip_id, order_id) VALUES (?1, ?2)")
            .bind(trip_id)
            .bind(order.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// The customer's open cart with its lines and running total.
    pub async fn view_cart(&self, customer_id: i64) -> Result<CartView, AppError> {
        let order = self.active_order(customer_id).await?;
        let lines = self.order_lines(order.id).await?;
        let total_cents = lines.iter().map(|line| line.price_cents).sum();
        Ok(CartView {
            order_id: order.id,
            lines,
            total_cents,
        })
    }

    /// Removes a line item from the customer's cart. If the supplied line
    /// item id does not pick out a row of the (trip, order) pair, every
    /// line item of that pair is removed instead.
    pub async fn delete_trip_from_cart(
        &self,
        customer_id: i64,
        trip_id: i64,
        order_id: i64,
        line_item_id: i64,
    ) -> Result<(), AppError> {
        self.owned_order(customer_id, order_id).await?;

        let deleted = sqlx::query(
            "DELETE FROM line_items WHERE id = ?1 AND trip_id = ?2 AND order_id = ?3",
        )
        .bind(line_item_id)
        .bind(trip_id)
        .bind(order_id)
        .execute(&self.db)
        .await?
        .rows_affected();

        if deleted == 0 {
            let swept = sqlx::query("DELETE FROM line_items WHERE trip_id = ?1 AND order_id = ?2")
                .bind(trip_id)
                .bind(order_id)
                .execute(&self.db)
                .await?
                .rows_affected();
            warn!(
                trip_id,
                order_id, line_item_id, swept, "line item id did not match, removed every row for the pair"
            );
        }
        Ok(())
    }

    /// The checkout view for an open order: its server-side total and the
    /// customer's stored payment methods. Read-only.
    pub async fn checkout(&self, customer_id: i64, order_id: i64) -> Result<CheckoutView, AppError> {
        let order = self.owned_order(customer_id, order_id).await?;
        if !order.active {
            return Err(AppError::Conflict("this order has already been placed".into()));
        }

        let lines = self.order_lines(order.id).await?;
        let total_cents = lines.iter().map(|line| line.price_cents).sum();
        let payment_types = sqlx::query_as::<_, PaymentType>(
            r#"SELECT id, customer_id, name, account_token, created_at
               FROM payment_types WHERE customer_id = ?1 ORDER BY name"#,
        )
        .bind(customer_id)
        .fetch_all(&self.db)
        .await?;

        Ok(CheckoutView {
            order_id: order.id,
            total_cents,
            payment_types,
        })
    }

    /// Turns the open cart into a placed order: takes one unit of stock per
    /// line item, stamps the order date and payment method and flips the
    /// order inactive. Runs in a single transaction; a stock shortfall rolls
    /// everything back. Both the order and the payment method must belong
    /// to the acting customer.
    pub async fn confirm_order(
        &self,
        customer_id: i64,
        order_id: i64,
        payment_type_id: i64,
    ) -> Result<OrderDetail, AppError> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, Order>(
            "SELECT id, customer_id, order_date, payment_type_id, active FROM orders WHERE id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if order.customer_id != customer_id {
            return Err(AppError::Forbidden);
        }
        if !order.active {
            return Err(AppError::Conflict("this order has already been placed".into()));
        }

        let payment = sqlx::query_as::<_, PaymentType>(
            "SELECT id, customer_id, name, account_token, created_at FROM payment_types WHERE id = ?1",
        )
        .bind(payment_type_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound)?;
        if payment.customer_id != customer_id {
            return Err(AppError::Forbidden);
        }

        // Each line item is one unit, so k rows of the same trip take k units.
        let counts = sqlx::query(
            "SELECT trip_id, COUNT(*) AS units FROM line_items WHERE order_id = ?1 GROUP BY trip_id",
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        for row in &counts {
            let trip_id: i64 = row.get("trip_id");
            let units: i64 = row.get("units");
            let updated = sqlx::query(
                r#"UPDATE trips
                   SET quantity = quantity - ?1, quantity_sold = quantity_sold + ?1
                   WHERE id = ?2 AND quantity >= ?1"#,
            )
            .bind(units)
            .bind(trip_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                warn!(order_id, trip_id, units, "not enough stock left, aborting confirmation");
                return Err(AppError::Conflict(
                    "not enough stock left to place this order".into(),
                ));
            }
        }

        sqlx::query("UPDATE orders SET payment_type_id = ?1, active = 0, order_date = ?2 WHERE id = ?3")
            .bind(payment_type_id)
            .bind(Utc::now())
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.order_detail(customer_id, order_id).await
    }

    /// Cancels the customer's open cart, deleting the order row and (by
    /// cascade) its line items. Placed orders are history and stay.
    pub async fn cancel_order(&self, customer_id: i64, order_id: i64) -> Result<(), AppError> {
        let order = self.owned_order(customer_id, order_id).await?;
        if !order.active {
            return Err(AppError::Conflict(
                "a placed order can no longer be cancelled".into(),
            ));
        }
        sqlx::query("DELETE FROM orders WHERE id = ?1")
            .bind(order.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Read-only view of one of the customer's orders, open or placed.
    pub async fn order_detail(&self, customer_id: i64, order_id: i64) -> Result<OrderDetail, AppError> {
        let order = self.owned_order(customer_id, order_id).await?;
        let lines = self.order_lines(order.id).await?;
        let total_cents = lines.iter().map(|line| line.price_cents).sum();
        Ok(OrderDetail {
            order,
            lines,
            total_cents,
        })
    }

    /// The customer's placed orders, newest first.
    pub async fn past_orders(&self, customer_id: i64) -> Result<Vec<Order>, AppError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"SELECT id, customer_id, order_date, payment_type_id, active
               FROM orders WHERE customer_id = ?1 AND active = 0
               ORDER BY order_date DESC"#,
        )
        .bind(customer_id)
        .fetch_all(&self.db)
        .await?;
        Ok(orders)
    }

    /// Resolves the customer's open cart, creating it on first use.
    async fn active_order(&self, customer_id: i64) -> Result<Order, AppError> {
        if let Some(order) = self.find_active_order(customer_id).await? {
            return Ok(order);
        }

        // Two requests can race here; the partial unique index rejects the
        // loser, which then picks up the winner's row.
        sqlx::query(
            r#"INSERT OR IGNORE INTO orders (customer_id, order_date, payment_type_id, active)
               VALUES (?1, NULL, NULL, 1)"#,
        )
        .bind(customer_id)
        .execute(&self.db)
        .await?;

        self.find_active_order(customer_id)
            .await?
            .ok_or_else(|| AppError::Other(anyhow::anyhow!("open cart vanished after creation")))
    }

    async fn find_active_order(&self, customer_id: i64) -> Result<Option<Order>, AppError> {
        let order = sqlx::query_as::<_, Order>(
            r#"SELECT id, customer_id, order_date, payment_type_id, active
               FROM orders WHERE customer_id = ?1 AND active = 1"#,
        )
        .bind(customer_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(order)
    }

    async fn owned_order(&self, customer_id: i64, order_id: i64) -> Result<Order, AppError> {
        let order = sqlx::query_as::<_, Order>(
            "SELECT id, customer_id, order_date, payment_type_id, active FROM orders WHERE id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;
        if order.customer_id != customer_id {
            return Err(AppError::Forbidden);
        }
        Ok(order)
    }

    async fn order_lines(&self, order_id: i64) -> Result<Vec<CartLine>, AppError> {
        let lines = sqlx::query_as::<_, CartLine>(
            r#"SELECT li.id, li.trip_id, li.order_id, t.title, t.price_cents
               FROM line_items li
               JOIN trips t ON t.id = li.trip_id
               WHERE li.order_id = ?1
               ORDER BY li.id"#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;
        Ok(lines)
    }

    async fn fetch_trip(&self, trip_id: i64) -> Result<Trip, AppError> {
        sqlx::query_as::<_, Trip>(
            r#"SELECT id, seller_id, trip_type_id, title, description, location,
                      num_of_nights, price_cents, quantity, quantity_sold, image
               FROM trips WHERE id = ?1"#,
        )
        .bind(trip_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)
    }
}
