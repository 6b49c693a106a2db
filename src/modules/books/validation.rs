//! Boundary validation of book payloads.
//!
//! Payloads are first read into lenient structs (strings for enums, `i64` for
//! stock, `f64` for the rating) so that `validator` can report every bad field
//! at once. A field whose JSON type does not fit is reported as `invalid_type`
//! under its own name and the remaining fields are still validated.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shelf_db::codec;
use validator::{Validate, ValidationError, ValidationErrors};

use super::models::{BookDraft, BookStatus, Genre};

pub const TITLE_MAX_CHARS: u64 = 255;
pub const RATING_MIN: f64 = 0.0;
pub const RATING_MAX: f64 = 5.0;

/// One violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// Every violated constraint of a rejected payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub violations: Vec<FieldViolation>,
}

impl ValidationFailure {
    pub fn single(
        field: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                code: code.into(),
                message: message.into(),
            }],
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.violations.iter().map(|v| v.field.as_str())
    }

    pub fn details(&self) -> Vec<Value> {
        self.violations
            .iter()
            .filter_map(|v| serde_json::to_value(v).ok())
            .collect()
    }

    fn new(mut violations: Vec<FieldViolation>) -> Self {
        violations.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));
        Self { violations }
    }

    fn from_errors(errors: &ValidationErrors) -> Vec<FieldViolation> {
        errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                let field = field.to_string();
                errors.iter().map(move |error| FieldViolation {
                    field: field.clone(),
                    code: error.code.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| default_message(&field, &error.code)),
                })
            })
            .collect()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

impl std::error::Error for ValidationFailure {}

fn default_message(field: &str, code: &str) -> String {
    match (field, code) {
        (_, "required") => format!("{field} is required"),
        ("title", "length") => format!("title must be 1 to {TITLE_MAX_CHARS} characters"),
        ("stock", "range") => "stock must be zero or more".to_string(),
        ("average_rating", "range") => {
            format!("average_rating must be between {RATING_MIN} and {RATING_MAX}")
        }
        _ => format!("{field} is invalid ({code})"),
    }
}

/// Body of `POST /books`.
#[derive(Debug, Deserialize, Validate)]
pub struct NewBookPayload {
    pub book_id: Option<String>,
    #[validate(required, length(min = 1, max = 255))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(required, custom(function = "validate_genres"))]
    pub genre: Option<Vec<String>>,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
    #[validate(required, range(min = 0))]
    pub stock: Option<i64>,
    #[validate(range(min = 0.0, max = 5.0))]
    pub average_rating: Option<f64>,
}

/// Body of `PUT /books/{book_id}`. Nothing is required; `book_id` and the
/// timestamps are ignored if sent.
#[derive(Debug, Deserialize, Validate)]
pub struct BookPatchPayload {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(custom(function = "validate_genres"))]
    pub genre: Option<Vec<String>>,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
    #[validate(range(min = 0))]
    pub stock: Option<i64>,
    #[validate(range(min = 0.0, max = 5.0))]
    pub average_rating: Option<f64>,
}

fn validate_genres(genres: &[String]) -> Result<(), ValidationError> {
    if genres.is_empty() {
        return Err(ValidationError::new("empty")
            .with_message("genre must contain at least one entry".into()));
    }

    let unknown: Vec<&str> = genres
        .iter()
        .filter(|g| Genre::from_str(g).is_err())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        let allowed: Vec<&str> = Genre::ALL.iter().map(Genre::as_str).collect();
        return Err(ValidationError::new("unknown_genre").with_message(
            format!(
                "unknown genre(s) {}; expected one of {}",
                unknown.join(", "),
                allowed.join(", ")
            )
            .into(),
        ));
    }

    Ok(())
}

fn validate_status(status: &str) -> Result<(), ValidationError> {
    match BookStatus::from_str(status) {
        Ok(_) => Ok(()),
        Err(_) => Err(ValidationError::new("unknown_status")
            .with_message(format!("status must be available or borrowed, got '{status}'").into())),
    }
}

/// Validate a create payload into a draft.
pub fn parse_new_book(payload: Value) -> Result<BookDraft, ValidationFailure> {
    let (payload, mistyped) = read_payload::<NewBookPayload>(payload)?;
    check_payload(&payload, mistyped)?;

    Ok(BookDraft {
        book_id: payload.book_id.filter(|id| !id.trim().is_empty()),
        title: payload.title,
        description: payload.description,
        genre: payload.genre.as_deref().map(parse_genres).transpose()?,
        status: payload.status.as_deref().map(parse_status).transpose()?,
        stock: payload.stock.map(parse_stock).transpose()?,
        average_rating: payload.average_rating.map(parse_rating).transpose()?,
    })
}

/// Validate an update payload into a draft.
pub fn parse_book_patch(payload: Value) -> Result<BookDraft, ValidationFailure> {
    let (payload, mistyped) = read_payload::<BookPatchPayload>(payload)?;
    check_payload(&payload, mistyped)?;

    Ok(BookDraft {
        book_id: None,
        title: payload.title,
        description: payload.description,
        genre: payload.genre.as_deref().map(parse_genres).transpose()?,
        status: payload.status.as_deref().map(parse_status).transpose()?,
        stock: payload.stock.map(parse_stock).transpose()?,
        average_rating: payload.average_rating.map(parse_rating).transpose()?,
    })
}

/// Read `payload` into `T`, setting aside every field whose JSON type does not
/// fit. The set-aside fields come back as `invalid_type` violations.
fn read_payload<T: DeserializeOwned>(
    payload: Value,
) -> Result<(T, Vec<FieldViolation>), ValidationFailure> {
    let Value::Object(mut fields) = payload else {
        return Err(ValidationFailure::single(
            "body",
            "not_an_object",
            "request body must be a JSON object",
        ));
    };

    if let Ok(payload) = serde_json::from_value(Value::Object(fields.clone())) {
        return Ok((payload, Vec::new()));
    }

    let mut mistyped = Vec::new();
    let names: Vec<String> = fields.keys().cloned().collect();
    for name in names {
        let Some(value) = fields.get(&name) else {
            continue;
        };
        let alone = Map::from_iter([(name.clone(), value.clone())]);
        if let Err(err) = serde_json::from_value::<T>(Value::Object(alone)) {
            fields.remove(&name);
            mistyped.push(FieldViolation {
                message: format!("{name} has the wrong type: {err}"),
                field: name,
                code: "invalid_type".to_string(),
            });
        }
    }

    let payload = serde_json::from_value(Value::Object(fields))
        .map_err(|err| ValidationFailure::single("body", "invalid_type", err.to_string()))?;
    Ok((payload, mistyped))
}

/// Run field validation and merge it with the type violations. A mistyped
/// field is not reported as missing as well.
fn check_payload(
    payload: &impl Validate,
    mistyped: Vec<FieldViolation>,
) -> Result<(), ValidationFailure> {
    let invalid = match payload.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => ValidationFailure::from_errors(&errors),
    };
    let invalid: Vec<FieldViolation> = invalid
        .into_iter()
        .filter(|v| !(v.code == "required" && mistyped.iter().any(|m| m.field == v.field)))
        .collect();

    let mut violations = mistyped;
    violations.extend(invalid);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure::new(violations))
    }
}

fn parse_genres(genres: &[String]) -> Result<Vec<Genre>, ValidationFailure> {
    genres
        .iter()
        .map(|g| {
            Genre::from_str(g)
                .map_err(|err| ValidationFailure::single("genre", "unknown_genre", err.to_string()))
        })
        .collect()
}

fn parse_status(status: &str) -> Result<BookStatus, ValidationFailure> {
    BookStatus::from_str(status)
        .map_err(|err| ValidationFailure::single("status", "unknown_status", err.to_string()))
}

fn parse_stock(stock: i64) -> Result<u64, ValidationFailure> {
    u64::try_from(stock).map_err(|_| {
        ValidationFailure::single("stock", "range", default_message("stock", "range"))
    })
}

fn parse_rating(rating: f64) -> Result<rust_decimal::Decimal, ValidationFailure> {
    codec::decimal_from_f64(rating)
        .map_err(|err| ValidationFailure::single("average_rating", "not_exact", err.to_string()))
}
