use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Genres a book can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Genre {
    Fiction,
    NonFiction,
    Fantasy,
    SciFi,
    Romance,
    Mystery,
    Thriller,
    Biography,
    History,
    SelfHelp,
}

impl Genre {
    pub const ALL: [Genre; 10] = [
        Genre::Fiction,
        Genre::NonFiction,
        Genre::Fantasy,
        Genre::SciFi,
        Genre::Romance,
        Genre::Mystery,
        Genre::Thriller,
        Genre::Biography,
        Genre::History,
        Genre::SelfHelp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::Fiction => "fiction",
            Genre::NonFiction => "non-fiction",
            Genre::Fantasy => "fantasy",
            Genre::SciFi => "sci-fi",
            Genre::Romance => "romance",
            Genre::Mystery => "mystery",
            Genre::Thriller => "thriller",
            Genre::Biography => "biography",
            Genre::History => "history",
            Genre::SelfHelp => "self-help",
        }
    }
}

impl FromStr for Genre {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Genre::ALL
            .into_iter()
            .find(|genre| genre.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether copies can currently be lent out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    #[default]
    Available,
    Borrowed,
}

impl BookStatus {
    pub const ALL: [BookStatus; 2] = [BookStatus::Available, BookStatus::Borrowed];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Borrowed => "borrowed",
        }
    }
}

impl FromStr for BookStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value '{0}'")]
pub struct UnknownVariant(pub String);

/// A stored book.
///
/// Fields other than `book_id` and `title` fall back to their defaults when a
/// stored item lacks them, so an item without a rating reads as rated 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Vec<Genre>,
    #[serde(default)]
    pub status: BookStatus,
    #[serde(default)]
    pub stock: u64,
    #[serde(default, with = "rating")]
    pub average_rating: Decimal,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Validated request content. Every field is optional: a create fills the
/// gaps with defaults, an update only touches what is present.
///
/// Timestamps are not part of a draft; the store sets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<Vec<Genre>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BookStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<u64>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "rating::serialize_some"
    )]
    pub average_rating: Option<Decimal>,
}

impl BookDraft {
    /// The supplied fields as a JSON object, ratings rendered as floats.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Ratings travel as JSON floats and are stored as exact decimals.
pub(crate) mod rating {
    use rust_decimal::Decimal;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use shelf_db::codec;

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let float = codec::f64_from_decimal(value).map_err(S::Error::custom)?;
        serializer.serialize_f64(float)
    }

    pub fn serialize_some<S: Serializer>(
        value: &Option<Decimal>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        codec::decimal_from_number(&number).map_err(D::Error::custom)
    }
}
