use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Form, Router,
};
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{order::CartLine, trip::format_cents},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/add_to_cart/:trip_id", post(add_to_cart))
        .route("/cart", get(view_cart))
        .route("/delete_trip_from_cart", post(delete_trip_from_cart))
        .route("/checkout/:order_id", post(checkout))
        .route("/order_confirmation", post(order_confirmation))
        .route("/final_order_view", post(cancel_order))
        .route("/order_detail/:order_id", get(order_detail))
}

#[derive(Clone)]
struct CartLineRow {
    id: i64,
    trip_id: i64,
    title: String,
    price: String,
}

impl From<CartLine> for CartLineRow {
    fn from(line: CartLine) -> Self {
        Self {
            id: line.id,
            trip_id: line.trip_id,
            title: line.title,
            price: format_cents(line.price_cents),
        }
    }
}

async fn add_to_cart(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    state.cart.add_trip_to_order(user.id, trip_id).await?;
    Ok(Redirect::to("/cart"))
}

#[derive(Template)]
#[template(path = "cart/cart.html")]
struct CartTemplate {
    order_id: i64,
    lines: Vec<CartLineRow>,
    total: String,
}

async fn view_cart(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let cart = state.cart.view_cart(user.id).await?;
    Ok(AskamaTemplateResponse::into_response(CartTemplate {
        order_id: cart.order_id,
        lines: cart.lines.into_iter().map(CartLineRow::from).collect(),
        total: format_cents(cart.total_cents),
    }))
}

#[derive(Deserialize)]
struct DeleteFromCartForm {
    trip_id: i64,
    order_id: i64,
    the_id: i64,
}

async fn delete_trip_from_cart(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<DeleteFromCartForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    state
        .cart
        .delete_trip_from_cart(user.id, form.trip_id, form.order_id, form.the_id)
        .await?;
    Ok(Redirect::to("/cart"))
}

// The checkout form still posts a client-side total; the server recomputes
// it from the stored line items and the posted value is ignored.
#[derive(Deserialize)]
struct CheckoutForm {
    total: Option<String>,
}

#[derive(Clone)]
struct PaymentOption {
    id: i64,
    label: String,
}

#[derive(Template)]
#[template(path = "cart/checkout.html")]
struct CheckoutTemplate {
    order_id: i64,
    total: String,
    payment_types: Vec<PaymentOption>,
}

async fn checkout(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(order_id): Path<i64>,
    Form(_form): Form<CheckoutForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let view = state.cart.checkout(user.id, order_id).await?;
    Ok(AskamaTemplateResponse::into_response(CheckoutTemplate {
        order_id: view.order_id,
        total: format_cents(view.total_cents),
        payment_types: view
            .payment_types
            .into_iter()
            .map(|pm| PaymentOption {
                id: pm.id,
                label: format!("{} ending in {}", pm.name, pm.last_four()),
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct ConfirmOrderForm {
    payment_type_id: i64,
    order_id: i64,
}

#[derive(Template)]
#[template(path = "cart/confirmation.html")]
struct ConfirmationTemplate {
    order_id: i64,
    placed_at: String,
    lines: Vec<CartLineRow>,
    total: String,
}

async fn order_confirmation(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<ConfirmOrderForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let placed = state
        .cart
        .confirm_order(user.id, form.order_id, form.payment_type_id)
        .await?;
    Ok(AskamaTemplateResponse::into_response(ConfirmationTemplate {
        order_id: placed.order.id,
        placed_at: placed
            .order
            .order_date
            .map(format_timestamp)
            .unwrap_or_default(),
        lines: placed.lines.into_iter().map(CartLineRow::from).collect(),
        total: format_cents(placed.total_cents),
    }))
}

#[derive(Deserialize)]
struct CancelOrderForm {
    order_id: i64,
}

#[derive(Template)]
#[template(path = "cart/cancelled.html")]
struct CancelledTemplate;

async fn cancel_order(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<CancelOrderForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    state.cart.cancel_order(user.id, form.order_id).await?;
    Ok(AskamaTemplateResponse::into_response(CancelledTemplate))
}

#[derive(Template)]
#[template(path = "cart/order_detail.html")]
struct OrderDetailTemplate {
    order_id: i64,
    placed: bool,
    placed_at: String,
    lines: Vec<CartLineRow>,
    total: String,
}

async fn order_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(order_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let detail = state.cart.order_detail(user.id, order_id).await?;
    Ok(AskamaTemplateResponse::into_response(OrderDetailTemplate {
        order_id: detail.order.id,
        placed: !detail.order.active,
        placed_at: detail
            .order
            .order_date
            .map(format_timestamp)
            .unwrap_or_default(),
        lines: detail.lines.into_iter().map(CartLineRow::from).collect(),
        total: format_cents(detail.total_cents),
    }))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}
