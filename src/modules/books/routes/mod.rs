//! HTTP handlers for `/books`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use shelf_http::error::AppError;

use super::models::Book;
use super::store::BookStore;
use super::validation::{parse_book_patch, parse_new_book};

pub type SharedStore = Arc<dyn BookStore>;

/// Routes relative to the module mount point.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/", get(list_books).post(create_book))
        .route(
            "/{book_id}",
            get(get_book).put(update_book).delete(delete_book),
        )
        .with_state(store)
}

pub(crate) fn not_found(book_id: &str) -> AppError {
    AppError::not_found(format!("Book {book_id} not found"))
}

async fn create_book(
    State(store): State<SharedStore>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let draft = parse_new_book(payload)?;
    let book = store.create(draft).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    State(store): State<SharedStore>,
    Path(book_id): Path<String>,
) -> Result<Json<Book>, AppError> {
    store
        .get(&book_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&book_id))
}

async fn list_books(State(store): State<SharedStore>) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(store.list().await?))
}

async fn update_book(
    State(store): State<SharedStore>,
    Path(book_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Book>, AppError> {
    let Json(payload) = payload?;
    let draft = parse_book_patch(payload)?;
    store
        .update(&book_id, draft)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&book_id))
}

async fn delete_book(
    State(store): State<SharedStore>,
    Path(book_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if store.delete(&book_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&book_id))
    }
}
