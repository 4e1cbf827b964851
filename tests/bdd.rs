use std::{collections::HashMap, fmt, fs::File, net::SocketAddr};

use anyhow::Context;
use chrono::Utc;
use cucumber::{given, then, when, World as _};
use sqlx::Row;
use tempfile::TempDir;
use tripmarket::{
    auth::{self, AuthenticatedUser},
    config::AppConfig,
    db::init_pool,
    models::trip::{format_cents, parse_amount},
    state::AppState,
};

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    user: Option<AuthenticatedUser>,
    other_user: Option<AuthenticatedUser>,
    trips: HashMap<String, i64>,
    payments: HashMap<String, i64>,
    current_order: Option<i64>,
    last_error: Option<String>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }

    fn user(&self) -> &AuthenticatedUser {
        self.user.as_ref().expect("user must be registered first")
    }

    fn other_user(&self) -> &AuthenticatedUser {
        self.other_user
            .as_ref()
            .expect("other user must be registered first")
    }

    fn trip_id(&self, title: &str) -> i64 {
        *self
            .trips
            .get(title)
            .unwrap_or_else(|| panic!("unknown trip {title:?}"))
    }

    fn payment_id(&self, name: &str) -> i64 {
        *self
            .payments
            .get(name)
            .unwrap_or_else(|| panic!("unknown payment method {name:?}"))
    }

    fn current_order(&self) -> i64 {
        self.current_order.expect("no order in play yet")
    }
}

struct TestState {
    app: AppState,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;

        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cookie_secret: "bdd-cookie-secret".into(),
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let app = AppState::new(config, db);
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.user = None;
    world.other_user = None;
    world.trips.clear();
    world.payments.clear();
    world.current_order = None;
    world.last_error = None;
}

#[given(
    regex = r#"^a registered user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn given_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    let created = auth::register_user(world.app_state(), &username, &email, &password)
        .await
        .expect("register user");
    world.user = Some(created);
}

#[given(
    regex = r#"^another registered user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn given_other_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    let created = auth::register_user(world.app_state(), &username, &email, &password)
        .await
        .expect("register other user");
    world.other_user = Some(created);
}

#[when(
    regex = r#"^I register a user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn when_register_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    let created = auth::register_user(world.app_state(), &username, &email, &password)
        .await
        .expect("register user");
    world.user = Some(created);
}

#[then(regex = r#"^I can authenticate as \"([^\"]+)\" using password \"([^\"]+)\"$"#)]
async fn then_can_authenticate(world: &mut AppWorld, identifier: String, password: String) {
    let authed = auth::authenticate_user(world.app_state(), &identifier, &password)
        .await
        .expect("authentication");
    assert_eq!(authed.username, identifier);
}

#[then(regex = r#"^authenticating as \"([^\"]+)\" with password \"([^\"]+)\" fails$"#)]
async fn then_authentication_fails(world: &mut AppWorld, identifier: String, password: String) {
    let result = auth::authenticate_user(world.app_state(), &identifier, &password).await;
    assert!(result.is_err(), "authentication should have been rejected");
}

#[given(regex = r#"^a trip \"([^\"]+)\" priced ([0-9.]+) with quantity (\d+)$"#)]
async fn given_trip(world: &mut AppWorld, title: String, price: String, quantity: i64) {
    let seller_id = world.user().id;
    let price_cents = parse_amount(&price).expect("price in the feature file must parse");
    let state = world.app_state();

    let trip_type_id: i64 = sqlx::query_scalar("SELECT id FROM trip_types ORDER BY id LIMIT 1")
        .fetch_one(&state.db)
        .await
        .expect("seeded trip type");
    let result = sqlx::query(
        r#"INSERT INTO trips
               (seller_id, trip_type_id, title, description, location,
                num_of_nights, price_cents, quantity, quantity_sold, image)
           VALUES (?1, ?2, ?3, '', '', 3, ?4, ?5, 0, NULL)"#,
    )
    .bind(seller_id)
    .bind(trip_type_id)
    .bind(&title)
    .bind(price_cents)
    .bind(quantity)
    .execute(&state.db)
    .await
    .expect("insert trip");

    world.trips.insert(title, result.last_insert_rowid());
}

#[given(regex = r#"^a stored payment method \"([^\"]+)\" for the user$"#)]
async fn given_payment_method(world: &mut AppWorld, name: String) {
    let customer_id = world.user().id;
    store_payment_method(world, name, customer_id).await;
}

#[given(regex = r#"^a stored payment method \"([^\"]+)\" for the other user$"#)]
async fn given_other_payment_method(world: &mut AppWorld, name: String) {
    let customer_id = world.other_user().id;
    store_payment_method(world, name, customer_id).await;
}

async fn store_payment_method(world: &mut AppWorld, name: String, customer_id: i64) {
    let result = sqlx::query(
        r#"INSERT INTO payment_types (customer_id, name, account_token, created_at)
           VALUES (?1, ?2, 'tok-4242424242424242', ?3)"#,
    )
    .bind(customer_id)
    .bind(&name)
    .bind(Utc::now())
    .execute(&world.app_state().db)
    .await
    .expect("insert payment method");

    world.payments.insert(name, result.last_insert_rowid());
}

#[when(regex = r#"^the user adds \"([^\"]+)\" to their cart$"#)]
async fn when_add_to_cart(world: &mut AppWorld, title: String) {
    let user_id = world.user().id;
    let trip_id = world.trip_id(&title);
    world
        .app_state()
        .cart
        .add_trip_to_order(user_id, trip_id)
        .await
        .expect("add to cart");
    let cart = world
        .app_state()
        .cart
        .view_cart(user_id)
        .await
        .expect("view cart");
    world.current_order = Some(cart.order_id);
}

#[then(regex = r#"^the cart total is \"([^\"]+)\" with (\d+) line items?$"#)]
async fn then_cart_total(world: &mut AppWorld, total: String, count: usize) {
    let user_id = world.user().id;
    let cart = world
        .app_state()
        .cart
        .view_cart(user_id)
        .await
        .expect("view cart");
    assert_eq!(format_cents(cart.total_cents), total);
    assert_eq!(cart.lines.len(), count);
    world.current_order = Some(cart.order_id);
}

#[when(regex = r#"^the user removes one \"([^\"]+)\" line item from the cart$"#)]
async fn when_remove_one_line(world: &mut AppWorld, title: String) {
    let user_id = world.user().id;
    let trip_id = world.trip_id(&title);
    let cart = world
        .app_state()
        .cart
        .view_cart(user_id)
        .await
        .expect("view cart");
    let line = cart
        .lines
        .iter()
        .find(|line| line.trip_id == trip_id)
        .expect("the trip should be in the cart");
    world
        .app_state()
        .cart
        .delete_trip_from_cart(user_id, trip_id, cart.order_id, line.id)
        .await
        .expect("delete line item");
}

#[when(regex = r#"^the user removes \"([^\"]+)\" from the cart with a stale line item id$"#)]
async fn when_remove_with_stale_id(world: &mut AppWorld, title: String) {
    let user_id = world.user().id;
    let trip_id = world.trip_id(&title);
    let order_id = world.current_order();
    world
        .app_state()
        .cart
        .delete_trip_from_cart(user_id, trip_id, order_id, 999_999)
        .await
        .expect("delete line items");
}

#[when(regex = r#"^the user confirms the order with payment method \"([^\"]+)\"$"#)]
async fn when_confirm_order(world: &mut AppWorld, payment: String) {
    let user_id = world.user().id;
    let order_id = world.current_order();
    let payment_id = world.payment_id(&payment);
    world
        .app_state()
        .cart
        .confirm_order(user_id, order_id, payment_id)
        .await
        .expect("confirm order");
}

#[when(regex = r#"^the user tries to confirm the order with payment method \"([^\"]+)\"$"#)]
async fn when_try_confirm_order(world: &mut AppWorld, payment: String) {
    let user_id = world.user().id;
    let order_id = world.current_order();
    let payment_id = world.payment_id(&payment);
    world.last_error = world
        .app_state()
        .cart
        .confirm_order(user_id, order_id, payment_id)
        .await
        .err()
        .map(|err| err.to_string());
}

#[when(regex = r#"^the other user tries to confirm the order with payment method \"([^\"]+)\"$"#)]
async fn when_other_tries_confirm(world: &mut AppWorld, payment: String) {
    let user_id = world.other_user().id;
    let order_id = world.current_order();
    let payment_id = world.payment_id(&payment);
    world.last_error = world
        .app_state()
        .cart
        .confirm_order(user_id, order_id, payment_id)
        .await
        .err()
        .map(|err| err.to_string());
}

#[when("the user cancels the order")]
async fn when_cancel_order(world: &mut AppWorld) {
    let user_id = world.user().id;
    let order_id = world.current_order();
    world
        .app_state()
        .cart
        .cancel_order(user_id, order_id)
        .await
        .expect("cancel order");
}

#[when("the user tries to cancel the order")]
async fn when_try_cancel_order(world: &mut AppWorld) {
    let user_id = world.user().id;
    let order_id = world.current_order();
    world.last_error = world
        .app_state()
        .cart
        .cancel_order(user_id, order_id)
        .await
        .err()
        .map(|err| err.to_string());
}

#[then("the operation is refused")]
async fn then_operation_refused(world: &mut AppWorld) {
    assert!(
        world.last_error.is_some(),
        "the operation should have been refused"
    );
}

#[then(regex = r#"^the trip \"([^\"]+)\" has quantity (\d+) and quantity sold (\d+)$"#)]
async fn then_trip_inventory(world: &mut AppWorld, title: String, quantity: i64, sold: i64) {
    let trip_id = world.trip_id(&title);
    let row = sqlx::query("SELECT quantity, quantity_sold FROM trips WHERE id = ?1")
        .bind(trip_id)
        .fetch_one(&world.app_state().db)
        .await
        .expect("trip row");
    assert_eq!(row.get::<i64, _>("quantity"), quantity);
    assert_eq!(row.get::<i64, _>("quantity_sold"), sold);
}

#[then("the order is no longer active and has an order date")]
async fn then_order_placed(world: &mut AppWorld) {
    let order_id = world.current_order();
    let row = sqlx::query("SELECT active, order_date, payment_type_id FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_one(&world.app_state().db)
        .await
        .expect("order row");
    assert!(!row.get::<bool, _>("active"));
    assert!(row.get::<Option<String>, _>("order_date").is_some());
    assert!(row.get::<Option<i64>, _>("payment_type_id").is_some());
}

#[then("the order is still active")]
async fn then_order_still_active(world: &mut AppWorld) {
    let order_id = world.current_order();
    let active: bool = sqlx::query_scalar("SELECT active FROM orders WHERE id = ?1")
        .bind(order_id)
        .fetch_one(&world.app_state().db)
        .await
        .expect("order row");
    assert!(active);
}

#[then(regex = r"^the user has (\d+) placed orders?$")]
async fn then_placed_order_count(world: &mut AppWorld, expected: usize) {
    let user_id = world.user().id;
    let orders = world
        .app_state()
        .cart
        .past_orders(user_id)
        .await
        .expect("past orders");
    assert_eq!(orders.len(), expected);
}

#[then(regex = r#"^the order detail total is \"([^\"]+)\"$"#)]
async fn then_order_detail_total(world: &mut AppWorld, total: String) {
    let user_id = world.user().id;
    let order_id = world.current_order();
    let detail = world
        .app_state()
        .cart
        .order_detail(user_id, order_id)
        .await
        .expect("order detail");
    assert_eq!(format_cents(detail.total_cents), total);
}

#[then("inserting a second open order for the user fails")]
async fn then_second_open_order_fails(world: &mut AppWorld) {
    let user_id = world.user().id;
    let result = sqlx::query(
        "INSERT INTO orders (customer_id, order_date, payment_type_id, active) VALUES (?1, NULL, NULL, 1)",
    )
    .bind(user_id)
    .execute(&world.app_state().db)
    .await;
    assert!(result.is_err(), "a second open cart must be rejected");
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
