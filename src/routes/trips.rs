use std::{collections::HashMap, str::FromStr};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    error::AppError,
    models::{
        BookingItem, Currency, ExpenseItem, InfoItem, JournalItem, Member, ScheduleItem,
        ShoppingItem, Tab, Trip, TripEntry, UiState,
    },
    services::rates::{total_spend, SpendSummary, StaticRates},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/trips", get(list_trips).post(create_trip))
        .route(
            "/api/trips/:trip_id",
            get(get_trip).put(replace_trip).delete(delete_trip),
        )
        .route("/api/trips/:trip_id/members", post(add_member))
        .route(
            "/api/trips/:trip_id/members/:member_id/remove",
            post(remove_member),
        )
        .route("/api/trips/:trip_id/total", get(trip_total))
        .route("/api/trips/:trip_id/toggle/:item_id", post(toggle_item))
        .route("/api/trips/:trip_id/transport/:item_id", put(set_transport))
        .route("/api/trips/:trip_id/:collection", post(add_entry))
        .route(
            "/api/trips/:trip_id/:collection/:entry_id",
            put(update_entry).delete(delete_entry),
        )
        .route("/api/ui-state", get(get_ui_state).put(put_ui_state))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collection {
    Items,
    Bookings,
    Expenses,
    Journals,
    ShoppingList,
    InfoItems,
}

impl FromStr for Collection {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "items" => Ok(Collection::Items),
            "bookings" => Ok(Collection::Bookings),
            "expenses" => Ok(Collection::Expenses),
            "journals" => Ok(Collection::Journals),
            "shoppingList" => Ok(Collection::ShoppingList),
            "infoItems" => Ok(Collection::InfoItems),
            _ => Err(AppError::NotFound),
        }
    }
}

async fn list_trips(State(state): State<AppState>) -> Json<Vec<Trip>> {
    Json(state.trips.trips())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewTripForm {
    #[serde(alias = "destination")]
    dest: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    base_currency: Currency,
    #[serde(default)]
    pin: String,
    member: NewMemberForm,
}

#[derive(Deserialize)]
struct NewMemberForm {
    name: String,
    pin: String,
    #[serde(default)]
    avatar: String,
    #[serde(default)]
    email: String,
}

impl From<NewMemberForm> for Member {
    fn from(form: NewMemberForm) -> Self {
        let mut member = Member::new(form.name.trim(), form.pin.trim());
        member.avatar = form.avatar;
        member.email = form.email;
        member
    }
}

async fn create_trip(
    State(state): State<AppState>,
    Json(form): Json<NewTripForm>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let mut trip = Trip::new(
        form.dest.trim(),
        form.start_date,
        form.end_date,
        form.base_currency,
        form.member.into(),
    );
    trip.pin = form.pin;
    let trip = state.trips.create_trip(trip).await?;
    if state.trips.ui_state().current_trip_id.is_none() {
        state.trips.set_current_trip(Some(trip.id.clone())).await?;
    }
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    state.trips.trip(&trip_id).map(Json).ok_or(AppError::NotFound)
}

async fn replace_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Json(mut trip): Json<Trip>,
) -> Result<Json<Trip>, AppError> {
    trip.id = trip_id;
    Ok(Json(state.trips.update_trip(trip).await?))
}

async fn delete_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.trips.delete_trip(&trip_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Json(form): Json<NewMemberForm>,
) -> Result<(StatusCode, Json<Member>), AppError> {
    let member = state.trips.add_member(&trip_id, form.into()).await?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[derive(Deserialize)]
struct PinForm {
    pin: String,
}

async fn remove_member(
    State(state): State<AppState>,
    Path((trip_id, member_id)): Path<(String, String)>,
    Json(form): Json<PinForm>,
) -> Result<StatusCode, AppError> {
    state
        .trips
        .remove_member(&trip_id, &member_id, &form.pin)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ?JPY=0.21&USD=31.5: one unit of that currency in the trip's home currency
async fn trip_total(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Query(query): Query<HashMap<String, f64>>,
) -> Result<Json<SpendSummary>, AppError> {
    let trip = state.trips.trip(&trip_id).ok_or(AppError::NotFound)?;
    let mut rates = StaticRates::new();
    for (code, rate) in query {
        let currency: Currency = code.parse()?;
        rates = rates.with_rate(currency, trip.base_currency, rate);
    }
    Ok(Json(total_spend(&trip, &rates).await))
}

async fn toggle_item(
    State(state): State<AppState>,
    Path((trip_id, item_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let completed = state.trips.toggle_completed(&trip_id, &item_id).await?;
    Ok(Json(serde_json::json!({ "isCompleted": completed })))
}

#[derive(Deserialize)]
struct TransportForm {
    text: String,
}

async fn set_transport(
    State(state): State<AppState>,
    Path((trip_id, item_id)): Path<(String, String)>,
    Json(form): Json<TransportForm>,
) -> Result<StatusCode, AppError> {
    state
        .trips
        .set_transport_suggestion(&trip_id, &item_id, form.text.trim().to_string())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_entry<T: TripEntry>(body: Value) -> Result<T, AppError> {
    serde_json::from_value(body)
        .map_err(|err| AppError::BadRequest(format!("{}: {err}", T::COLLECTION)))
}

async fn add_typed<T: TripEntry>(state: &AppState, trip_id: &str, body: Value) -> Result<Value, AppError> {
    let saved = state.trips.add_entry(trip_id, parse_entry::<T>(body)?).await?;
    Ok(serde_json::to_value(saved)?)
}

async fn update_typed<T: TripEntry>(
    state: &AppState,
    trip_id: &str,
    entry_id: String,
    mut body: Value,
) -> Result<Value, AppError> {
    if let Some(object) = body.as_object_mut() {
        object.insert("id".into(), Value::String(entry_id));
    }
    let saved = state
        .trips
        .update_entry(trip_id, parse_entry::<T>(body)?)
        .await?;
    Ok(serde_json::to_value(saved)?)
}

async fn add_entry(
    State(state): State<AppState>,
    Path((trip_id, collection)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let saved = match collection.parse::<Collection>()? {
        Collection::Items => add_typed::<ScheduleItem>(&state, &trip_id, body).await?,
        Collection::Bookings => add_typed::<BookingItem>(&state, &trip_id, body).await?,
        Collection::Expenses => add_typed::<ExpenseItem>(&state, &trip_id, body).await?,
        Collection::Journals => add_typed::<JournalItem>(&state, &trip_id, body).await?,
        Collection::ShoppingList => add_typed::<ShoppingItem>(&state, &trip_id, body).await?,
        Collection::InfoItems => add_typed::<InfoItem>(&state, &trip_id, body).await?,
    };
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn update_entry(
    State(state): State<AppState>,
    Path((trip_id, collection, entry_id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let saved = match collection.parse::<Collection>()? {
        Collection::Items => update_typed::<ScheduleItem>(&state, &trip_id, entry_id, body).await?,
        Collection::Bookings => update_typed::<BookingItem>(&state, &trip_id, entry_id, body).await?,
        Collection::Expenses => update_typed::<ExpenseItem>(&state, &trip_id, entry_id, body).await?,
        Collection::Journals => update_typed::<JournalItem>(&state, &trip_id, entry_id, body).await?,
        Collection::ShoppingList => {
            update_typed::<ShoppingItem>(&state, &trip_id, entry_id, body).await?
        }
        Collection::InfoItems => update_typed::<InfoItem>(&state, &trip_id, entry_id, body).await?,
    };
    Ok(Json(saved))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path((trip_id, collection, entry_id)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let trips = &state.trips;
    match collection.parse::<Collection>()? {
        Collection::Items => trips.delete_entry::<ScheduleItem>(&trip_id, &entry_id).await?,
        Collection::Bookings => trips.delete_entry::<BookingItem>(&trip_id, &entry_id).await?,
        Collection::Expenses => trips.delete_entry::<ExpenseItem>(&trip_id, &entry_id).await?,
        Collection::Journals => trips.delete_entry::<JournalItem>(&trip_id, &entry_id).await?,
        Collection::ShoppingList => trips.delete_entry::<ShoppingItem>(&trip_id, &entry_id).await?,
        Collection::InfoItems => trips.delete_entry::<InfoItem>(&trip_id, &entry_id).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_ui_state(State(state): State<AppState>) -> Json<UiState> {
    Json(state.trips.ui_state())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiStateForm {
    // absent: keep; null: close the current trip
    #[serde(default, deserialize_with = "present")]
    current_trip_id: Option<Option<String>>,
    active_tab: Option<Tab>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

async fn put_ui_state(
    State(state): State<AppState>,
    Json(form): Json<UiStateForm>,
) -> Result<Json<UiState>, AppError> {
    let mut ui = state.trips.ui_state();
    if let Some(current_trip_id) = form.current_trip_id {
        ui = state.trips.set_current_trip(current_trip_id).await?;
    }
    if let Some(tab) = form.active_tab {
        ui = state.trips.set_active_tab(tab).await?;
    }
    Ok(Json(ui))
}
