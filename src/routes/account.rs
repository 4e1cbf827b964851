use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::State,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Form, Router,
};
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use sqlx::Row;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::{
        customer::Customer,
        payment::{validate_account_token, PaymentType},
        trip::format_cents,
    },
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route("/profile/edit", get(edit_profile_form).post(edit_profile_submit))
        .route("/payment_types", get(payment_types))
        .route(
            "/payment_types/new",
            get(new_payment_type_form).post(new_payment_type_submit),
        )
        .route("/delete_payment_type", post(delete_payment_type))
}

#[derive(Clone)]
struct PastOrderRow {
    id: i64,
    placed_at: String,
    total: String,
}

#[derive(Template)]
#[template(path = "account/profile.html")]
struct ProfileTemplate {
    username: String,
    phone: String,
    street_address: String,
    past_orders: Vec<PastOrderRow>,
}

async fn profile(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let customer = fetch_customer(&state, user.id).await?;

    let rows = sqlx::query(
        r#"SELECT o.id, o.order_date, COALESCE(SUM(t.price_cents), 0) AS total_cents
           FROM orders o
           LEFT JOIN line_items li ON li.order_id = o.id
           LEFT JOIN trips t ON t.id = li.trip_id
           WHERE o.customer_id = ?1 AND o.active = 0
           GROUP BY o.id
           ORDER BY o.order_date DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    let past_orders = rows
        .into_iter()
        .map(|row| PastOrderRow {
            id: row.get("id"),
            placed_at: row
                .get::<Option<DateTime<Utc>>, _>("order_date")
                .map(format_timestamp)
                .unwrap_or_else(|| "–".into()),
            total: format_cents(row.get("total_cents")),
        })
        .collect();

    Ok(AskamaTemplateResponse::into_response(ProfileTemplate {
        username: user.username.clone(),
        phone: customer.phone.unwrap_or_default(),
        street_address: customer.street_address.unwrap_or_default(),
        past_orders,
    }))
}

#[derive(Template)]
#[template(path = "account/edit.html")]
struct EditProfileTemplate {
    phone: String,
    street_address: String,
}

async fn edit_profile_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let customer = fetch_customer(&state, user.id).await?;
    Ok(AskamaTemplateResponse::into_response(EditProfileTemplate {
        phone: customer.phone.unwrap_or_default(),
        street_address: customer.street_address.unwrap_or_default(),
    }))
}

#[derive(Deserialize)]
struct EditProfileForm {
    phone: Option<String>,
    street_address: Option<String>,
}

async fn edit_profile_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<EditProfileForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    sqlx::query("UPDATE customers SET phone = ?1, street_address = ?2 WHERE user_id = ?3")
        .bind(normalize(form.phone))
        .bind(normalize(form.street_address))
        .bind(user.id)
        .execute(&state.db)
        .await?;
    Ok(Redirect::to("/profile"))
}

#[derive(Clone)]
struct PaymentRow {
    id: i64,
    name: String,
    last_four: String,
}

#[derive(Template)]
#[template(path = "account/payment_types.html")]
struct PaymentTypesTemplate {
    payment_types: Vec<PaymentRow>,
}

async fn payment_types(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let methods = sqlx::query_as::<_, PaymentType>(
        r#"SELECT id, customer_id, name, account_token, created_at
           FROM payment_types WHERE customer_id = ?1 ORDER BY name"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(PaymentTypesTemplate {
        payment_types: methods
            .into_iter()
            .map(|pm| {
                let last_four = pm.last_four().to_string();
                PaymentRow {
                    id: pm.id,
                    name: pm.name,
                    last_four,
                }
            })
            .collect(),
    }))
}

#[derive(Template)]
#[template(path = "account/payment_type_new.html")]
struct NewPaymentTypeTemplate {
    show_error: bool,
    error_message: String,
    name: String,
}

async fn new_payment_type_form(current: CurrentUser) -> Result<impl IntoResponse, AppError> {
    current.require_user()?;
    Ok(AskamaTemplateResponse::into_response(NewPaymentTypeTemplate {
        show_error: false,
        error_message: String::new(),
        name: String::new(),
    }))
}

#[derive(Deserialize)]
struct NewPaymentTypeForm {
    name: String,
    account_token: String,
}

async fn new_payment_type_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<NewPaymentTypeForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;

    let name = form.name.trim().to_string();
    let token = form.account_token.trim().to_string();
    let error = if name.is_empty() {
        Some("please name the payment method".to_string())
    } else {
        validate_account_token(&token).err()
    };
    if let Some(message) = error {
        return Ok(AskamaTemplateResponse::into_response(
            NewPaymentTypeTemplate {
                show_error: true,
                error_message: message,
                name,
            },
        ));
    }

    sqlx::query(
        r#"INSERT INTO payment_types (customer_id, name, account_token, created_at)
           VALUES (?1, ?2, ?3, ?4)"#,
    )
    .bind(user.id)
    .bind(&name)
    .bind(&token)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(Redirect::to("/payment_types").into_response())
}

#[derive(Deserialize)]
struct DeletePaymentTypeForm {
    payment_type_id: i64,
}

async fn delete_payment_type(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<DeletePaymentTypeForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;

    let owner: Option<i64> =
        sqlx::query_scalar("SELECT customer_id FROM payment_types WHERE id = ?1")
            .bind(form.payment_type_id)
            .fetch_optional(&state.db)
            .await?;
    let Some(owner) = owner else {
        return Err(AppError::NotFound);
    };
    if owner != user.id {
        return Err(AppError::Forbidden);
    }

    let referenced: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE payment_type_id = ?1")
            .bind(form.payment_type_id)
            .fetch_one(&state.db)
            .await?;
    if referenced > 0 {
        return Err(AppError::Conflict(
            "this payment method was used on a placed order and cannot be removed".into(),
        ));
    }

    sqlx::query("DELETE FROM payment_types WHERE id = ?1")
        .bind(form.payment_type_id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to("/payment_types"))
}

async fn fetch_customer(state: &AppState, user_id: i64) -> Result<Customer, AppError> {
    sqlx::query_as::<_, Customer>(
        "SELECT user_id, phone, street_address FROM customers WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound)
}

fn normalize(input: Option<String>) -> Option<String> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}
