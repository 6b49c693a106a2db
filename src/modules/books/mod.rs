pub mod functions;
pub mod models;
pub mod routes;
pub mod store;
pub mod validation;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Value};
use shelf_kernel::{InitCtx, Module};

use store::BookStore;

/// Book inventory module: CRUD routes over a [`BookStore`].
pub struct BooksModule {
    store: Arc<dyn BookStore>,
}

impl BooksModule {
    pub fn new(store: Arc<dyn BookStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        self.store
            .initialize()
            .await
            .context("failed to provision the books table")?;
        tracing::info!(
            module = self.name(),
            table = %ctx.settings.storage.table_name,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.store.clone())
    }

    fn openapi(&self) -> Option<Value> {
        Some(openapi_fragment())
    }
}

fn error_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/ErrorResponse" }
            }
        }
    })
}

fn book_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {
            "application/json": {
                "schema": { "$ref": "#/components/schemas/Book" }
            }
        }
    })
}

fn book_id_parameter() -> Value {
    json!({
        "name": "book_id",
        "in": "path",
        "required": true,
        "schema": { "type": "string" }
    })
}

fn request_body(schema: &str) -> Value {
    json!({
        "required": true,
        "content": {
            "application/json": {
                "schema": { "$ref": format!("#/components/schemas/{schema}") }
            }
        }
    })
}

fn openapi_fragment() -> Value {
    let genres: Vec<&str> = models::Genre::ALL.iter().map(models::Genre::as_str).collect();
    let statuses: Vec<&str> = models::BookStatus::ALL
        .iter()
        .map(models::BookStatus::as_str)
        .collect();

    json!({
        "paths": {
            "/": {
                "get": {
                    "summary": "List books, lowest average_rating first",
                    "tags": ["Books"],
                    "responses": {
                        "200": {
                            "description": "Every book",
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "array",
                                        "items": { "$ref": "#/components/schemas/Book" }
                                    }
                                }
                            }
                        },
                        "500": error_response("Internal server error"),
                        "503": error_response("Storage unavailable")
                    }
                },
                "post": {
                    "summary": "Create a book",
                    "tags": ["Books"],
                    "requestBody": request_body("NewBook"),
                    "responses": {
                        "201": book_response("Created book"),
                        "400": error_response("Validation error or malformed JSON"),
                        "500": error_response("Internal server error"),
                        "503": error_response("Storage unavailable")
                    }
                }
            },
            "/{book_id}": {
                "get": {
                    "summary": "Get a book",
                    "tags": ["Books"],
                    "parameters": [book_id_parameter()],
                    "responses": {
                        "200": book_response("The book"),
                        "404": error_response("Book not found")
                    }
                },
                "put": {
                    "summary": "Update the supplied fields of a book",
                    "tags": ["Books"],
                    "parameters": [book_id_parameter()],
                    "requestBody": request_body("BookPatch"),
                    "responses": {
                        "200": book_response("Updated book"),
                        "400": error_response("Validation error or malformed JSON"),
                        "404": error_response("Book not found")
                    }
                },
                "delete": {
                    "summary": "Delete a book",
                    "tags": ["Books"],
                    "parameters": [book_id_parameter()],
                    "responses": {
                        "204": { "description": "Book deleted" },
                        "404": error_response("Book not found")
                    }
                }
            }
        },
        "components": {
            "schemas": {
                "Book": {
                    "type": "object",
                    "properties": {
                        "book_id": { "type": "string" },
                        "title": { "type": "string", "minLength": 1, "maxLength": 255 },
                        "description": { "type": ["string", "null"] },
                        "genre": {
                            "type": "array",
                            "minItems": 1,
                            "items": { "type": "string", "enum": genres }
                        },
                        "status": { "type": "string", "enum": statuses, "default": "available" },
                        "stock": { "type": "integer", "minimum": 0 },
                        "average_rating": { "type": "number", "minimum": 0, "maximum": 5, "default": 0 },
                        "created_at": { "type": "string", "format": "date-time" },
                        "updated_at": { "type": "string", "format": "date-time" }
                    },
                    "required": ["book_id", "title", "genre", "status", "stock", "average_rating", "created_at", "updated_at"]
                },
                "NewBook": {
                    "type": "object",
                    "properties": {
                        "book_id": { "type": "string" },
                        "title": { "type": "string", "minLength": 1, "maxLength": 255 },
                        "description": { "type": "string" },
                        "genre": {
                            "type": "array",
                            "minItems": 1,
                            "items": { "type": "string", "enum": genres }
                        },
                        "status": { "type": "string", "enum": statuses },
                        "stock": { "type": "integer", "minimum": 0 },
                        "average_rating": { "type": "number", "minimum": 0, "maximum": 5 }
                    },
                    "required": ["title", "genre", "stock"]
                },
                "BookPatch": {
                    "type": "object",
                    "minProperties": 1,
                    "properties": {
                        "title": { "type": "string", "minLength": 1, "maxLength": 255 },
                        "description": { "type": "string" },
                        "genre": {
                            "type": "array",
                            "minItems": 1,
                            "items": { "type": "string", "enum": genres }
                        },
                        "status": { "type": "string", "enum": statuses },
                        "stock": { "type": "integer", "minimum": 0 },
                        "average_rating": { "type": "number", "minimum": 0, "maximum": 5 }
                    }
                }
            }
        }
    })
}

/// Create the books module over `store`.
pub fn create_module(store: Arc<dyn BookStore>) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(store))
}
