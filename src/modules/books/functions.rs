//! Gateway-style handlers: one function per operation, each taking a proxy
//! event and returning a proxy response whose body is a JSON string.
//!
//! They share validation and the [`BookStore`] with the HTTP routes; only the
//! envelope differs.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shelf_db::StorageModule;
use shelf_http::error::AppError;
use shelf_kernel::settings::StorageSettings;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::models::Book;
use super::routes::not_found;
use super::store::{BookStore, TableBookStore};
use super::validation::{parse_book_patch, parse_new_book};

/// The subset of an API gateway proxy event the handlers read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    #[serde(default)]
    pub path_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

impl GatewayEvent {
    pub fn with_book_id(book_id: impl Into<String>) -> Self {
        Self {
            path_parameters: Some(HashMap::from([("book_id".to_string(), book_id.into())])),
            body: None,
        }
    }

    pub fn with_body(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Non-empty `book_id` path parameter.
    pub fn book_id(&self) -> Option<&str> {
        self.path_parameters
            .as_ref()?
            .get("book_id")
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// The body parsed as JSON. A missing body reads as `{}`.
    fn json_body(&self) -> Result<Value, AppError> {
        match self.body.as_deref() {
            None => Ok(json!({})),
            Some(body) => serde_json::from_str(body).map_err(|err| {
                AppError::bad_request(format!("Invalid JSON in request body: {err}"))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl GatewayResponse {
    fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status_code: status.as_u16(),
            headers: BTreeMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body: body.to_string(),
        }
    }

    fn ok<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self::json(status, &body),
            Err(err) => Self::error(AppError::Internal(err.into())),
        }
    }

    fn error(err: AppError) -> Self {
        let (status, body) = err.into_parts();
        Self::json(status, &body)
    }

    pub fn body_json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Serialize)]
struct BookList<'a> {
    count: usize,
    books: &'a [Book],
}

fn respond(result: Result<GatewayResponse, AppError>) -> GatewayResponse {
    result.unwrap_or_else(GatewayResponse::error)
}

fn required_book_id(event: &GatewayEvent) -> Result<&str, AppError> {
    event
        .book_id()
        .ok_or_else(|| AppError::bad_request("book_id is required"))
}

pub async fn post_book(store: &dyn BookStore, event: &GatewayEvent) -> GatewayResponse {
    respond(try_post_book(store, event).await)
}

pub async fn get_book(store: &dyn BookStore, event: &GatewayEvent) -> GatewayResponse {
    respond(try_get_book(store, event).await)
}

pub async fn list_books(store: &dyn BookStore, _event: &GatewayEvent) -> GatewayResponse {
    respond(try_list_books(store).await)
}

pub async fn put_book(store: &dyn BookStore, event: &GatewayEvent) -> GatewayResponse {
    respond(try_put_book(store, event).await)
}

pub async fn delete_book(store: &dyn BookStore, event: &GatewayEvent) -> GatewayResponse {
    respond(try_delete_book(store, event).await)
}

async fn try_post_book(
    store: &dyn BookStore,
    event: &GatewayEvent,
) -> Result<GatewayResponse, AppError> {
    let draft = parse_new_book(event.json_body()?)?;
    let book = store.create(draft).await?;
    Ok(GatewayResponse::ok(StatusCode::CREATED, &book))
}

async fn try_get_book(
    store: &dyn BookStore,
    event: &GatewayEvent,
) -> Result<GatewayResponse, AppError> {
    let book_id = required_book_id(event)?;
    let book = store.get(book_id).await?.ok_or_else(|| not_found(book_id))?;
    Ok(GatewayResponse::ok(StatusCode::OK, &book))
}

async fn try_list_books(store: &dyn BookStore) -> Result<GatewayResponse, AppError> {
    let books = store.list().await?;
    Ok(GatewayResponse::ok(
        StatusCode::OK,
        &BookList {
            count: books.len(),
            books: &books,
        },
    ))
}

async fn try_put_book(
    store: &dyn BookStore,
    event: &GatewayEvent,
) -> Result<GatewayResponse, AppError> {
    let book_id = required_book_id(event)?;
    let draft = parse_book_patch(event.json_body()?)?;
    let book = store
        .update(book_id, draft)
        .await?
        .ok_or_else(|| not_found(book_id))?;
    Ok(GatewayResponse::ok(StatusCode::OK, &book))
}

async fn try_delete_book(
    store: &dyn BookStore,
    event: &GatewayEvent,
) -> Result<GatewayResponse, AppError> {
    let book_id = required_book_id(event)?;
    if !store.delete(book_id).await? {
        return Err(not_found(book_id));
    }
    Ok(GatewayResponse::ok(
        StatusCode::OK,
        &json!({ "message": "Book deleted successfully", "book_id": book_id }),
    ))
}

#[derive(Debug, Error)]
#[error("unknown function '{0}'; expected one of post_book, get_book, list_books, put_book, delete_book")]
pub struct UnknownFunction(pub String);

/// A deployable handler, addressed by its function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionHandler {
    PostBook,
    GetBook,
    ListBooks,
    PutBook,
    DeleteBook,
}

impl FunctionHandler {
    pub const ALL: [FunctionHandler; 5] = [
        FunctionHandler::PostBook,
        FunctionHandler::GetBook,
        FunctionHandler::ListBooks,
        FunctionHandler::PutBook,
        FunctionHandler::DeleteBook,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FunctionHandler::PostBook => "post_book",
            FunctionHandler::GetBook => "get_book",
            FunctionHandler::ListBooks => "list_books",
            FunctionHandler::PutBook => "put_book",
            FunctionHandler::DeleteBook => "delete_book",
        }
    }

    fn needs_book_id(&self) -> bool {
        matches!(
            self,
            FunctionHandler::GetBook | FunctionHandler::PutBook | FunctionHandler::DeleteBook
        )
    }

    pub async fn invoke(&self, store: &dyn BookStore, event: &GatewayEvent) -> GatewayResponse {
        match self {
            FunctionHandler::PostBook => post_book(store, event).await,
            FunctionHandler::GetBook => get_book(store, event).await,
            FunctionHandler::ListBooks => list_books(store, event).await,
            FunctionHandler::PutBook => put_book(store, event).await,
            FunctionHandler::DeleteBook => delete_book(store, event).await,
        }
    }
}

impl FromStr for FunctionHandler {
    type Err = UnknownFunction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunctionHandler::ALL
            .into_iter()
            .find(|handler| handler.name() == s)
            .ok_or_else(|| UnknownFunction(s.to_string()))
    }
}

impl fmt::Display for FunctionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Process-wide state of a deployed function: the store is opened on the
/// first invocation that needs it and reused by later ones.
pub struct FunctionRuntime {
    settings: StorageSettings,
    store: OnceCell<Arc<dyn BookStore>>,
}

impl FunctionRuntime {
    pub fn new(settings: StorageSettings) -> Self {
        Self {
            settings,
            store: OnceCell::new(),
        }
    }

    /// Runtime over an existing store.
    pub fn with_store(store: Arc<dyn BookStore>) -> Self {
        Self {
            settings: StorageSettings::default(),
            store: OnceCell::new_with(Some(store)),
        }
    }

    async fn store(&self) -> anyhow::Result<&Arc<dyn BookStore>> {
        self.store
            .get_or_try_init(|| async {
                let storage = StorageModule::open(&self.settings).await?;
                let store: Arc<dyn BookStore> =
                    Arc::new(TableBookStore::new(storage.engine(), &self.settings));
                Ok::<_, anyhow::Error>(store)
            })
            .await
    }

    pub async fn invoke(&self, handler: FunctionHandler, event: &GatewayEvent) -> GatewayResponse {
        if handler.needs_book_id() && event.book_id().is_none() {
            return GatewayResponse::error(AppError::bad_request("book_id is required"));
        }

        let store = match self.store().await {
            Ok(store) => store,
            Err(err) => {
                tracing::error!(
                    function = %handler,
                    error = %format!("{err:#}"),
                    "failed to open book storage"
                );
                return GatewayResponse::error(AppError::unavailable(
                    "Storage is temporarily unavailable",
                ));
            }
        };

        let response = handler.invoke(store.as_ref(), event).await;
        tracing::info!(function = %handler, status = response.status_code, "function invoked");
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_db::MemoryEngine;

    fn store() -> TableBookStore {
        TableBookStore::new(Arc::new(MemoryEngine::in_memory()), &StorageSettings::default())
    }

    fn hobbit() -> Value {
        json!({
            "title": "The Hobbit",
            "genre": ["fantasy"],
            "stock": 10,
            "average_rating": 4.8
        })
    }

    #[test]
    fn event_reads_camel_case_fields() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "pathParameters": { "book_id": "b-1" },
            "body": "{\"stock\": 5}",
            "httpMethod": "PUT"
        }))
        .unwrap();

        assert_eq!(event.book_id(), Some("b-1"));
        assert_eq!(event.json_body().unwrap(), json!({ "stock": 5 }));
    }

    #[test]
    fn event_without_parameters_has_no_book_id() {
        let event: GatewayEvent = serde_json::from_value(json!({ "pathParameters": null })).unwrap();
        assert_eq!(event.book_id(), None);
        assert_eq!(GatewayEvent::with_book_id("").book_id(), None);
    }

    #[test]
    fn response_serializes_for_the_gateway() {
        let response = GatewayResponse::json(StatusCode::OK, &json!({ "count": 0 }));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["statusCode"], 200);
        assert_eq!(wire["headers"]["Content-Type"], "application/json");
        assert_eq!(wire["body"], "{\"count\":0}");
    }

    #[test]
    fn handler_names_parse() {
        for handler in FunctionHandler::ALL {
            assert_eq!(handler.name().parse::<FunctionHandler>().unwrap(), handler);
        }
        assert!("gets_book".parse::<FunctionHandler>().is_err());
    }

    #[tokio::test]
    async fn post_then_get_returns_the_record() {
        let store = store();
        let created = post_book(&store, &GatewayEvent::default().with_body(&hobbit())).await;
        assert_eq!(created.status_code, 201);

        let book_id = created.body_json().unwrap()["book_id"]
            .as_str()
            .unwrap()
            .to_string();
        let fetched = get_book(&store, &GatewayEvent::with_book_id(&book_id)).await;
        assert_eq!(fetched.status_code, 200);
        assert_eq!(fetched.body_json().unwrap()["average_rating"], json!(4.8));
    }

    #[tokio::test]
    async fn post_with_invalid_json_is_a_bad_request() {
        let event = GatewayEvent {
            body: Some("{not json".to_string()),
            ..GatewayEvent::default()
        };
        let response = post_book(&store(), &event).await;
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body_json().unwrap()["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn post_without_body_fails_validation() {
        let response = post_book(&store(), &GatewayEvent::default()).await;
        assert_eq!(response.status_code, 400);
        assert_eq!(
            response.body_json().unwrap()["error"]["code"],
            "validation_error"
        );
    }

    #[tokio::test]
    async fn missing_book_id_is_reported() {
        let store = store();
        for response in [
            get_book(&store, &GatewayEvent::default()).await,
            put_book(&store, &GatewayEvent::default()).await,
            delete_book(&store, &GatewayEvent::default()).await,
        ] {
            assert_eq!(response.status_code, 400);
            assert_eq!(
                response.body_json().unwrap()["error"]["message"],
                "book_id is required"
            );
        }
    }

    #[tokio::test]
    async fn list_wraps_books_with_a_count() {
        let store = store();
        let mut low = hobbit();
        low["average_rating"] = json!(1.5);
        post_book(&store, &GatewayEvent::default().with_body(&hobbit())).await;
        post_book(&store, &GatewayEvent::default().with_body(&low)).await;

        let response = list_books(&store, &GatewayEvent::default()).await;
        let body = response.body_json().unwrap();
        assert_eq!(body["count"], 2);
        assert_eq!(body["books"][0]["average_rating"], json!(1.5));
        assert_eq!(body["books"][1]["average_rating"], json!(4.8));
    }

    #[tokio::test]
    async fn put_and_delete_report_missing_books() {
        let store = store();
        let event = GatewayEvent::with_book_id("ghost").with_body(&json!({ "stock": 1 }));

        assert_eq!(put_book(&store, &event).await.status_code, 404);
        assert_eq!(delete_book(&store, &event).await.status_code, 404);
    }

    #[tokio::test]
    async fn delete_confirms_the_removed_id() {
        let store = store();
        let created = post_book(&store, &GatewayEvent::default().with_body(&hobbit())).await;
        let book_id = created.body_json().unwrap()["book_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = delete_book(&store, &GatewayEvent::with_book_id(&book_id)).await;
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.body_json().unwrap(),
            json!({ "message": "Book deleted successfully", "book_id": book_id })
        );
    }

    #[tokio::test]
    async fn runtime_rejects_missing_id_before_opening_storage() {
        let settings = StorageSettings {
            snapshot_path: Some("/nonexistent-dir/\0/books.json".into()),
            ..StorageSettings::default()
        };
        let runtime = FunctionRuntime::new(settings);

        let response = runtime
            .invoke(FunctionHandler::GetBook, &GatewayEvent::default())
            .await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn runtime_reuses_its_store() {
        let runtime = FunctionRuntime::new(StorageSettings::default());
        let created = runtime
            .invoke(
                FunctionHandler::PostBook,
                &GatewayEvent::default().with_body(&hobbit()),
            )
            .await;
        assert_eq!(created.status_code, 201);

        let listed = runtime
            .invoke(FunctionHandler::ListBooks, &GatewayEvent::default())
            .await;
        assert_eq!(listed.body_json().unwrap()["count"], 1);
    }
}
