use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::de::DeserializeOwned;
use shared::{Card, CardKey, NewCard};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::domain::CardService;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub card_service: CardService,
}

impl AppState {
    pub fn new(card_service: CardService) -> Self {
        Self { card_service }
    }
}

/// Create the router serving `/cards`. Methods without a handler get 405.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/cards",
            get(list_cards)
                .post(create_card)
                .put(update_card)
                .delete(delete_card)
                .options(preflight),
        )
        // Any origin may call us; sent on every response, preflight included
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Decode a JSON body regardless of its Content-Type, answering 400 on failure
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        warn!("Rejecting malformed card payload: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid input").into_response()
    })
}

/// Axum handler function for GET /cards
pub async fn list_cards(State(state): State<AppState>) -> impl IntoResponse {
    info!("GET /cards");

    match state.card_service.list_cards().await {
        Ok(cards) => (StatusCode::OK, Json(cards)).into_response(),
        Err(e) => {
            error!("Error fetching cards: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch cards").into_response()
        }
    }
}

/// Axum handler function for POST /cards
pub async fn create_card(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    info!("POST /cards");

    let card: NewCard = match parse_body(&body) {
        Ok(card) => card,
        Err(rejection) => return rejection,
    };

    match state.card_service.create_card(card).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => {
            error!("Error inserting card: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to insert card").into_response()
        }
    }
}

/// Axum handler function for PUT /cards
pub async fn update_card(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let card: Card = match parse_body(&body) {
        Ok(card) => card,
        Err(rejection) => return rejection,
    };
    info!("PUT /cards - id: {}", card.id);

    match state.card_service.update_card(&card).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("Error updating card {}: {:?}", card.id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to update card").into_response()
        }
    }
}

/// Axum handler function for DELETE /cards
pub async fn delete_card(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let key: CardKey = match parse_body(&body) {
        Ok(key) => key,
        Err(rejection) => return rejection,
    };
    info!("DELETE /cards - id: {}", key.id);

    match state.card_service.delete_card(key).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("Error deleting card {}: {:?}", key.id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete card").into_response()
        }
    }
}

/// Axum handler function for OPTIONS /cards (CORS preflight)
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}
