//! Book document model and validated client input.

use crate::error::{AppError, Result};
use crate::library::rating;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A single star rating left by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    /// ID of the rating user.
    pub user_id: String,

    /// Grade between 1 and 5.
    pub grade: u8,
}

/// A book record as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Unique identifier for the book.
    pub id: String,

    /// ID of the user who created the book.
    pub user_id: String,

    /// Book title.
    pub title: String,

    /// Author name.
    pub author: String,

    /// Publication year.
    pub year: i32,

    /// Genre.
    pub genre: String,

    /// Public URL of the cover image.
    pub image_url: String,

    /// Ratings in submission order.
    pub ratings: Vec<Rating>,

    /// Mean of all grades, rounded to one decimal.
    pub average_rating: f64,
}

impl Book {
    /// Build a new book owned by `user_id` from validated fields.
    ///
    /// Initial ratings are attributed to the owner, so at most one is accepted.
    pub fn new(
        user_id: &str,
        fields: BookFields,
        image_url: String,
        initial_grades: &[u8],
    ) -> Result<Self> {
        let mut book = Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: fields.title,
            author: fields.author,
            year: fields.year,
            genre: fields.genre,
            image_url,
            ratings: Vec::new(),
            average_rating: 0.0,
        };

        for grade in initial_grades {
            rating::apply(&mut book, user_id, *grade)?;
        }

        Ok(book)
    }

    /// Overwrite editable fields with the ones present in `patch`.
    pub fn apply_patch(&mut self, patch: BookPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(author) = patch.author {
            self.author = author;
        }
        if let Some(year) = patch.year {
            self.year = year;
        }
        if let Some(genre) = patch.genre {
            self.genre = genre;
        }
    }

    /// Check whether `user_id` owns this book.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Check whether `user_id` has already rated this book.
    pub fn has_rating_from(&self, user_id: &str) -> bool {
        self.ratings.iter().any(|r| r.user_id == user_id)
    }
}

/// Validated, required fields for a new book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookFields {
    /// Book title.
    pub title: String,
    /// Author name.
    pub author: String,
    /// Publication year.
    pub year: i32,
    /// Genre.
    pub genre: String,
}

/// Client payload for creating a book (the `book` multipart field).
///
/// `userId` and `averageRating` may be present for compatibility with older
/// clients but are ignored: ownership comes from the token and the average
/// is always computed here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, deserialize_with = "deserialize_year")]
    year: Option<i32>,
    #[serde(default)]
    genre: Option<String>,
    #[serde(default)]
    ratings: Vec<RatingInput>,
}

/// A rating entry inside a create payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RatingInput {
    #[serde(default)]
    grade: Option<serde_json::Value>,
}

impl RatingInput {
    fn is_unrated(&self) -> bool {
        self.grade.as_ref().and_then(|g| g.as_f64()) == Some(0.0)
    }
}

impl NewBook {
    /// Validate required fields and initial grades.
    pub fn validate(self) -> Result<(BookFields, Vec<u8>)> {
        let fields = BookFields {
            title: required_text("title", self.title)?,
            author: required_text("author", self.author)?,
            year: self
                .year
                .ok_or_else(|| AppError::Validation("Field 'year' is required".to_string()))?,
            genre: required_text("genre", self.genre)?,
        };

        // The front end sends grade 0 when the creator did not pick one.
        let grades = self
            .ratings
            .iter()
            .filter(|r| !r.is_unrated())
            .map(|r| rating::parse_grade(r.grade.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok((fields, grades))
    }
}

/// Client payload for updating a book. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New author.
    #[serde(default)]
    pub author: Option<String>,
    /// New year.
    #[serde(default, deserialize_with = "deserialize_year")]
    pub year: Option<i32>,
    /// New genre.
    #[serde(default)]
    pub genre: Option<String>,
}

impl BookPatch {
    /// Reject present-but-blank text fields and trim the rest.
    pub fn validate(self) -> Result<Self> {
        Ok(Self {
            title: optional_text("title", self.title)?,
            author: optional_text("author", self.author)?,
            year: self.year,
            genre: optional_text("genre", self.genre)?,
        })
    }
}

fn required_text(field: &str, value: Option<String>) -> Result<String> {
    optional_text(field, value)?
        .ok_or_else(|| AppError::Validation(format!("Field '{}' is required", field)))
}

fn optional_text(field: &str, value: Option<String>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Err(AppError::Validation(format!(
            "Field '{}' must not be empty",
            field
        ))),
        Some(v) => Ok(Some(v.trim().to_string())),
    }
}

/// Accept the year either as a JSON number or as a numeric string, which is
/// what form-based clients send.
fn deserialize_year<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum YearField {
        Number(i32),
        Text(String),
    }

    match Option::<YearField>::deserialize(deserializer)? {
        None => Ok(None),
        Some(YearField::Number(n)) => Ok(Some(n)),
        Some(YearField::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid year: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> BookFields {
        BookFields {
            title: "Dune".to_string(),
            author: "Frank Herbert".to_string(),
            year: 1965,
            genre: "Science fiction".to_string(),
        }
    }

    #[test]
    fn new_book_from_front_end_payload() {
        let payload = json!({
            "userId": "spoofed",
            "title": " Dune ",
            "author": "Frank Herbert",
            "year": "1965",
            "genre": "Science fiction",
            "ratings": [{ "userId": "spoofed", "grade": 4 }],
            "averageRating": 5
        });

        let input: NewBook = serde_json::from_value(payload).unwrap();
        let (fields, grades) = input.validate().unwrap();
        assert_eq!(fields.title, "Dune");
        assert_eq!(fields.year, 1965);
        assert_eq!(grades, vec![4]);

        let book = Book::new("owner", fields, "http://x/uploads/a.jpg".into(), &grades).unwrap();
        assert_eq!(book.user_id, "owner");
        assert_eq!(book.ratings[0].user_id, "owner");
        assert_eq!(book.average_rating, 4.0);
    }

    #[test]
    fn new_book_zero_grade_means_unrated() {
        let input: NewBook = serde_json::from_value(json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "year": 1965,
            "genre": "SF",
            "ratings": [{ "userId": "owner", "grade": 0 }]
        }))
        .unwrap();
        let (fields, grades) = input.validate().unwrap();
        assert!(grades.is_empty());

        let book = Book::new("owner", fields, "img".into(), &grades).unwrap();
        assert!(book.ratings.is_empty());
        assert_eq!(book.average_rating, 0.0);

        let input: NewBook = serde_json::from_value(json!({
            "title": "Dune",
            "author": "Frank Herbert",
            "year": 1965,
            "genre": "SF",
            "ratings": [{ "grade": 6 }]
        }))
        .unwrap();
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn new_book_missing_field_rejected() {
        let input: NewBook = serde_json::from_value(json!({
            "title": "Dune",
            "year": 1965,
            "genre": "SF"
        }))
        .unwrap();
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn new_book_blank_title_rejected() {
        let input: NewBook = serde_json::from_value(json!({
            "title": "   ",
            "author": "A",
            "year": 2000,
            "genre": "SF"
        }))
        .unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn new_book_two_initial_ratings_conflict() {
        let result = Book::new("owner", fields(), String::new(), &[3, 4]);
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut book = Book::new("owner", fields(), "img".into(), &[]).unwrap();
        let patch: BookPatch = serde_json::from_value(json!({
            "title": "Dune Messiah",
            "year": 1969,
            "userId": "someone-else",
            "averageRating": 5
        }))
        .unwrap();

        book.apply_patch(patch.validate().unwrap());
        assert_eq!(book.title, "Dune Messiah");
        assert_eq!(book.year, 1969);
        assert_eq!(book.author, "Frank Herbert");
        assert_eq!(book.user_id, "owner");
        assert_eq!(book.average_rating, 0.0);
    }

    #[test]
    fn invalid_year_string_fails_to_parse() {
        let result: std::result::Result<BookPatch, _> =
            serde_json::from_value(json!({ "year": "nineteen" }));
        assert!(result.is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let book = Book::new("owner", fields(), "img".into(), &[5]).unwrap();
        let value = serde_json::to_value(&book).unwrap();
        assert_eq!(value["userId"], "owner");
        assert_eq!(value["imageUrl"], "img");
        assert_eq!(value["averageRating"], 5.0);
        assert_eq!(value["ratings"][0]["grade"], 5);
    }
}
