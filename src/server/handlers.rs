//! HTTP request handlers.

use crate::error::{AppError, Result};
use crate::images::{ImagePipeline, Upload};
use crate::library::{Book, BookPatch, NewBook, rating};
use crate::server::AppState;
use crate::server::middleware::AuthUser;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{
        FromRequest, Multipart, Path, Request, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderMap, StatusCode, header},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Number of books returned by the best-rated listing.
const BEST_RATED_LIMIT: usize = 3;

/// Plain confirmation body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Unwrap a JSON body, turning any rejection into a 400.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

// ============================================================================
// HEALTH
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    books: usize,
}

/// Liveness plus a cheap database round-trip.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok",
        books: state.db.count_books()?,
    }))
}

// ============================================================================
// AUTH API
// ============================================================================

/// Signup and login request.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

/// Login response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    user_id: String,
    token: String,
}

/// Auth signup.
pub async fn signup(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let req = json_body(payload)?;
    state.auth.signup(&req.email, &req.password)?;

    Ok((StatusCode::CREATED, MessageResponse::new("User created")))
}

/// Auth login.
pub async fn login(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let req = json_body(payload)?;
    let (user, token) = state.auth.login(&req.email, &req.password)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        token,
    }))
}

// ============================================================================
// BOOK QUERIES
// ============================================================================

/// List every book.
pub async fn list_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.list_books()?))
}

/// Top rated books.
pub async fn best_rated_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    Ok(Json(state.db.best_rated_books(BEST_RATED_LIMIT)?))
}

/// Single book.
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Book>> {
    let book = state
        .db
        .get_book(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    Ok(Json(book))
}

// ============================================================================
// BOOK MUTATIONS
// ============================================================================

/// Fields of a book multipart form.
#[derive(Debug, Default)]
struct BookForm {
    book: Option<String>,
    image: Option<Upload>,
}

impl BookForm {
    /// Parse the `book` JSON field, or fall back to the default when absent.
    fn book_json<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.book {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| AppError::Validation(format!("Invalid 'book' field: {}", e))),
            None => Ok(T::default()),
        }
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::Validation(format!("Failed to read upload: {}", e.body_text()))
    }
}

/// Read the `book` and `image` fields.
///
/// The image type is checked before its bytes are read and its size is
/// checked while reading, so bad uploads never reach the pipeline.
async fn read_book_form(images: &ImagePipeline, mut multipart: Multipart) -> Result<BookForm> {
    let mut form = BookForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "book" => {
                form.book = Some(field.text().await.map_err(multipart_error)?);
            }
            "image" => {
                if form.image.is_some() {
                    return Err(AppError::Validation(
                        "Only one image can be uploaded".to_string(),
                    ));
                }

                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let file_name = field.file_name().map(str::to_string);
                images.check(&content_type, 0)?;

                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    data.extend_from_slice(&chunk);
                    images.check(&content_type, data.len())?;
                }

                form.image = Some(Upload {
                    file_name,
                    content_type,
                    data,
                });
            }
            other => {
                tracing::debug!(field = other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(form)
}

/// Create a book from a multipart form with a required cover.
pub async fn create_book(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Book>)> {
    let multipart = multipart.map_err(|e| AppError::Validation(e.body_text()))?;
    let form = read_book_form(&state.images, multipart).await?;

    if form.book.is_none() {
        return Err(AppError::Validation("Field 'book' is required".to_string()));
    }
    let (fields, grades) = form.book_json::<NewBook>()?.validate()?;

    let upload = form
        .image
        .ok_or_else(|| AppError::Validation("An image is required".to_string()))?;

    let file_name = state.images.store(upload).await?;
    let image_url = ImagePipeline::public_url(&state.base_url(&headers), &file_name);

    let book = match Book::new(&user.user_id, fields, image_url.clone(), &grades)
        .and_then(|book| state.db.insert_book(&book).map(|()| book))
    {
        Ok(book) => book,
        Err(e) => {
            state.images.remove_by_url(&image_url).await;
            return Err(e);
        }
    };

    tracing::info!(book_id = %book.id, user_id = %user.user_id, "Book created");
    Ok((StatusCode::CREATED, Json(book)))
}

/// Update a book from either a JSON body or a multipart form with an optional cover.
pub async fn update_book(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    headers: HeaderMap,
    req: Request,
) -> Result<Json<Book>> {
    let mut book = state
        .db
        .get_book(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    if !book.is_owned_by(&user.user_id) {
        return Err(AppError::Forbidden(
            "Only the owner can modify this book".to_string(),
        ));
    }

    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("multipart/form-data"));

    let (patch, upload) = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        let form = read_book_form(&state.images, multipart).await?;
        (form.book_json::<BookPatch>()?, form.image)
    } else {
        let body = Bytes::from_request(req, &state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        let patch = if body.iter().all(u8::is_ascii_whitespace) {
            BookPatch::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))?
        };
        (patch, None)
    };

    book.apply_patch(patch.validate()?);

    let old_image_url = book.image_url.clone();
    if let Some(upload) = upload {
        let file_name = state.images.store(upload).await?;
        book.image_url = ImagePipeline::public_url(&state.base_url(&headers), &file_name);
    }
    let image_replaced = book.image_url != old_image_url;

    let saved = match state.db.update_book(&book) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AppError::NotFound(format!("Book not found: {}", id))),
        Err(e) => Err(e),
    };
    if let Err(e) = saved {
        if image_replaced {
            state.images.remove_by_url(&book.image_url).await;
        }
        return Err(e);
    }

    if image_replaced {
        state.images.remove_by_url(&old_image_url).await;
    }

    tracing::info!(book_id = %book.id, image_replaced, "Book updated");
    Ok(Json(book))
}

/// Delete a book and its cover.
pub async fn delete_book(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let book = state
        .db
        .get_book(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    if !book.is_owned_by(&user.user_id) {
        return Err(AppError::Forbidden(
            "Only the owner can delete this book".to_string(),
        ));
    }

    if !state.db.delete_book(&id)? {
        return Err(AppError::NotFound(format!("Book not found: {}", id)));
    }

    state.images.remove_by_url(&book.image_url).await;

    tracing::info!(book_id = %id, "Book deleted");
    Ok(MessageResponse::new("Book deleted"))
}

/// Rating request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    rating: Option<serde_json::Value>,
}

/// Rate a book as the authenticated user.
pub async fn rate_book(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<RatingRequest>, JsonRejection>,
) -> Result<Json<Book>> {
    let req = json_body(payload)?;
    let grade = rating::parse_grade(req.rating.as_ref())?;

    if let Some(claimed) = req.user_id.as_deref()
        && claimed != user.user_id
    {
        return Err(AppError::Forbidden(
            "Cannot rate on behalf of another user".to_string(),
        ));
    }

    let book = state.db.add_rating(&id, &user.user_id, grade)?;

    tracing::info!(
        book_id = %id,
        grade,
        average = book.average_rating,
        "Book rated"
    );
    Ok(Json(book))
}
