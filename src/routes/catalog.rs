use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use sqlx::Row;

use crate::{
    auth::CurrentUser,
    error::AppError,
    models::trip::{format_cents, parse_amount, Trip, TripType},
    routes::public::TripCard,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list_trips", get(list_trips))
        .route("/single_trip/:trip_id", get(single_trip).post(add_to_wishlist))
        .route("/trip_types", get(list_trip_types))
        .route("/trip_type_trips/:type_id", get(trips_of_type))
        .route("/search", get(search))
        .route("/sell_trip", get(sell_trip_form).post(sell_trip_submit))
        .route("/my_trips", get(my_trips))
        .route("/delete_trip", post(delete_trip))
        .route("/wishlist", get(wishlist))
}

const TRIP_COLUMNS: &str = r#"id, seller_id, trip_type_id, title, description, location,
                              num_of_nights, price_cents, quantity, quantity_sold, image"#;

async fn fetch_trip(state: &AppState, trip_id: i64) -> Result<Trip, AppError> {
    sqlx::query_as::<_, Trip>(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?1"))
        .bind(trip_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound)
}

#[derive(Template)]
#[template(path = "trips/list.html")]
struct TripsListTemplate {
    trips: Vec<TripCard>,
}

async fn list_trips(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let trips = sqlx::query_as::<_, Trip>(&format!(
        "SELECT {TRIP_COLUMNS} FROM trips ORDER BY id"
    ))
    .fetch_all(&state.db)
    .await?;
    Ok(AskamaTemplateResponse::into_response(TripsListTemplate {
        trips: trips.into_iter().map(TripCard::from).collect(),
    }))
}

#[derive(Template)]
#[template(path = "trips/single.html")]
struct SingleTripTemplate {
    id: i64,
    title: String,
    description: String,
    location: String,
    nights: i64,
    price: String,
    remaining: i64,
    in_stock: bool,
    seller: String,
    trip_type: String,
    has_image: bool,
    image: String,
    logged_in: bool,
}

async fn single_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let trip = fetch_trip(&state, trip_id).await?;
    let seller: String = sqlx::query_scalar("SELECT username FROM users WHERE id = ?1")
        .bind(trip.seller_id)
        .fetch_one(&state.db)
        .await?;
    let trip_type: String = sqlx::query_scalar("SELECT name FROM trip_types WHERE id = ?1")
        .bind(trip.trip_type_id)
        .fetch_one(&state.db)
        .await?;

    Ok(AskamaTemplateResponse::into_response(SingleTripTemplate {
        id: trip.id,
        title: trip.title.clone(),
        description: trip.description.clone(),
        location: trip.location.clone(),
        nights: trip.num_of_nights,
        price: format_cents(trip.price_cents),
        remaining: trip.quantity,
        in_stock: trip.in_stock(),
        seller,
        trip_type,
        has_image: trip.image.is_some(),
        image: trip.image.clone().unwrap_or_default(),
        logged_in: current.0.is_some(),
    }))
}

#[derive(Deserialize)]
struct WishlistForm {
    note: Option<String>,
}

async fn add_to_wishlist(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(trip_id): Path<i64>,
    Form(form): Form<WishlistForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    fetch_trip(&state, trip_id).await?;

    let note = form.note.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });
    sqlx::query("INSERT INTO wishlist_items (trip_id, customer_id, note) VALUES (?1, ?2, ?3)")
        .bind(trip_id)
        .bind(user.id)
        .bind(note)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to(&format!("/single_trip/{trip_id}")))
}

#[derive(Clone)]
struct TripTypeCard {
    id: i64,
    name: String,
    num_trips: i64,
    trips: Vec<TripCard>,
}

#[derive(Template)]
#[template(path = "trips/types.html")]
struct TripTypesTemplate {
    trip_types: Vec<TripTypeCard>,
}

async fn list_trip_types(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let types = sqlx::query_as::<_, TripType>("SELECT id, name FROM trip_types ORDER BY id DESC")
        .fetch_all(&state.db)
        .await?;

    let mut cards = Vec::with_capacity(types.len());
    for trip_type in types {
        let num_trips: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE trip_type_id = ?1")
                .bind(trip_type.id)
                .fetch_one(&state.db)
                .await?;
        let newest = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE trip_type_id = ?1 ORDER BY id DESC LIMIT 3"
        ))
        .bind(trip_type.id)
        .fetch_all(&state.db)
        .await?;
        cards.push(TripTypeCard {
            id: trip_type.id,
            name: trip_type.name,
            num_trips,
            trips: newest.into_iter().map(TripCard::from).collect(),
        });
    }

    Ok(AskamaTemplateResponse::into_response(TripTypesTemplate {
        trip_types: cards,
    }))
}

#[derive(Template)]
#[template(path = "trips/type_trips.html")]
struct TripsOfTypeTemplate {
    type_name: String,
    trips: Vec<TripCard>,
}

async fn trips_of_type(
    State(state): State<AppState>,
    Path(type_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let trip_type =
        sqlx::query_as::<_, TripType>("SELECT id, name FROM trip_types WHERE id = ?1")
            .bind(type_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or(AppError::NotFound)?;
    let trips = sqlx::query_as::<_, Trip>(&format!(
        "SELECT {TRIP_COLUMNS} FROM trips WHERE trip_type_id = ?1 ORDER BY id DESC"
    ))
    .bind(type_id)
    .fetch_all(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(TripsOfTypeTemplate {
        type_name: trip_type.name,
        trips: trips.into_iter().map(TripCard::from).collect(),
    }))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Template)]
#[template(path = "trips/search.html")]
struct SearchTemplate {
    query: String,
    searched: bool,
    results: Vec<TripCard>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.q.unwrap_or_default().trim().to_string();
    if query.is_empty() {
        return Ok(AskamaTemplateResponse::into_response(SearchTemplate {
            query,
            searched: false,
            results: Vec::new(),
        }));
    }

    let pattern = format!("%{query}%");
    let trips = sqlx::query_as::<_, Trip>(&format!(
        r#"SELECT {TRIP_COLUMNS} FROM trips
           WHERE title LIKE ?1 OR location LIKE ?1
           ORDER BY title"#
    ))
    .bind(&pattern)
    .fetch_all(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(SearchTemplate {
        query,
        searched: true,
        results: trips.into_iter().map(TripCard::from).collect(),
    }))
}

#[derive(Clone)]
struct TripTypeOption {
    id: i64,
    name: String,
}

#[derive(Template)]
#[template(path = "trips/sell.html")]
struct SellTripTemplate {
    trip_types: Vec<TripTypeOption>,
}

async fn sell_trip_form(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    current.require_user()?;
    let trip_types = sqlx::query_as::<_, TripType>("SELECT id, name FROM trip_types ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(AskamaTemplateResponse::into_response(SellTripTemplate {
        trip_types: trip_types
            .into_iter()
            .map(|t| TripTypeOption {
                id: t.id,
                name: t.name,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct SellTripForm {
    title: String,
    description: Option<String>,
    location: Option<String>,
    num_of_nights: i64,
    price: String,
    quantity: i64,
    trip_type_id: i64,
    image: Option<String>,
}

#[derive(Template)]
#[template(path = "trips/created.html")]
struct TripCreatedTemplate {
    trip_id: i64,
    title: String,
}

async fn sell_trip_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<SellTripForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;

    let title = form.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::BadRequest("a trip needs a title".into()));
    }
    if form.num_of_nights < 1 {
        return Err(AppError::BadRequest(
            "a trip lasts at least one night".into(),
        ));
    }
    if form.quantity < 0 {
        return Err(AppError::BadRequest("quantity cannot be negative".into()));
    }
    let Some(price_cents) = parse_amount(&form.price) else {
        return Err(AppError::BadRequest(
            "price must be a positive amount with at most two decimal places".into(),
        ));
    };
    let type_exists = sqlx::query("SELECT id FROM trip_types WHERE id = ?1")
        .bind(form.trip_type_id)
        .fetch_optional(&state.db)
        .await?;
    if type_exists.is_none() {
        return Err(AppError::BadRequest("unknown trip type".into()));
    }

    let image = form.image.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    let result = sqlx::query(
        r#"INSERT INTO trips
               (seller_id, trip_type_id, title, description, location,
                num_of_nights, price_cents, quantity, quantity_sold, image)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)"#,
    )
    .bind(user.id)
    .bind(form.trip_type_id)
    .bind(&title)
    .bind(form.description.unwrap_or_default().trim().to_string())
    .bind(form.location.unwrap_or_default().trim().to_string())
    .bind(form.num_of_nights)
    .bind(price_cents)
    .bind(form.quantity)
    .bind(image)
    .execute(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(TripCreatedTemplate {
        trip_id: result.last_insert_rowid(),
        title,
    }))
}

#[derive(Clone)]
struct MyTripRow {
    id: i64,
    title: String,
    price: String,
    quantity: i64,
    quantity_sold: i64,
}

#[derive(Template)]
#[template(path = "trips/mine.html")]
struct MyTripsTemplate {
    trips: Vec<MyTripRow>,
}

async fn my_trips(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let trips = sqlx::query_as::<_, Trip>(&format!(
        "SELECT {TRIP_COLUMNS} FROM trips WHERE seller_id = ?1 ORDER BY id DESC"
    ))
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(MyTripsTemplate {
        trips: trips
            .into_iter()
            .map(|trip| MyTripRow {
                id: trip.id,
                title: trip.title,
                price: format_cents(trip.price_cents),
                quantity: trip.quantity,
                quantity_sold: trip.quantity_sold,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct DeleteTripForm {
    trip_id: i64,
}

async fn delete_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<DeleteTripForm>,
) -> Result<Redirect, AppError> {
    let user = current.require_user()?;
    let trip = fetch_trip(&state, form.trip_id).await?;
    if trip.seller_id != user.id {
        return Err(AppError::Forbidden);
    }

    let referenced: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM line_items WHERE trip_id = ?1")
        .bind(trip.id)
        .fetch_one(&state.db)
        .await?;
    if referenced > 0 {
        return Err(AppError::Conflict(
            "this trip has already been ordered and cannot be removed".into(),
        ));
    }

    sqlx::query("DELETE FROM trips WHERE id = ?1")
        .bind(trip.id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to("/my_trips"))
}

#[derive(Clone)]
struct WishRow {
    trip_id: i64,
    title: String,
    location: String,
    note: String,
}

#[derive(Template)]
#[template(path = "wishlist.html")]
struct WishlistTemplate {
    items: Vec<WishRow>,
}

async fn wishlist(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let user = current.require_user()?;
    let rows = sqlx::query(
        r#"SELECT w.trip_id, w.note, t.title, t.location
           FROM wishlist_items w
           JOIN trips t ON t.id = w.trip_id
           WHERE w.customer_id = ?1
           ORDER BY w.id DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(AskamaTemplateResponse::into_response(WishlistTemplate {
        items: rows
            .into_iter()
            .map(|row| WishRow {
                trip_id: row.get("trip_id"),
                title: row.get("title"),
                location: row.get("location"),
                note: row.get::<Option<String>, _>("note").unwrap_or_default(),
            })
            .collect(),
    }))
}
