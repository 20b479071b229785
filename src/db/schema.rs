use crate::db::*;
use crate::error::{AppError, Result};
use crate::library::{Book, Rating, rating};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str =
    "id, user_id, title, author, year, genre, image_url, average_rating";

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS books (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                year INTEGER NOT NULL,
                genre TEXT NOT NULL,
                image_url TEXT NOT NULL,
                average_rating REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            -- seq keeps submission order
            CREATE TABLE IF NOT EXISTS ratings (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                book_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                grade INTEGER NOT NULL CHECK (grade BETWEEN 1 AND 5),
                created_at INTEGER NOT NULL,
                UNIQUE (book_id, user_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_books_rating ON books(average_rating DESC);
            CREATE INDEX IF NOT EXISTS idx_ratings_book ON ratings(book_id);
            "#,
        )
        .map_err(|e| AppError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== USER OPERATIONS ==========

    /// Create a new user. Fails with `Conflict` if the email is taken.
    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.password_hash, user.created_at],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Email '{}' is already registered", user.email))
            } else {
                AppError::Database(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(())
    }

    /// Get user by email.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?1",
            params![email],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get user: {}", e)))
    }

    /// Get user by ID.
    pub fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, email, password_hash, created_at FROM users WHERE id = ?1",
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(|e| AppError::Database(format!("Failed to get user: {}", e)))
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, email, password_hash, created_at FROM users ORDER BY email")
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let users = stmt
            .query_map([], Self::row_to_user)
            .map_err(|e| AppError::Database(format!("Failed to list users: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect users: {}", e)))?;

        Ok(users)
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    // ========== BOOK OPERATIONS ==========

    /// Insert a new book along with its initial ratings.
    pub fn insert_book(&self, book: &Book) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let now = now_timestamp();
        tx.execute(
            "INSERT INTO books
             (id, user_id, title, author, year, genre, image_url, average_rating, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                book.id,
                book.user_id,
                book.title,
                book.author,
                book.year,
                book.genre,
                book.image_url,
                book.average_rating,
                now,
            ],
        )
        .map_err(|e| AppError::Database(format!("Failed to insert book: {}", e)))?;

        for rating in &book.ratings {
            Self::insert_rating(&tx, &book.id, rating)?;
        }

        tx.commit()
            .map_err(|e| AppError::Database(format!("Failed to commit book: {}", e)))?;
        Ok(())
    }

    /// Get book by ID.
    pub fn get_book(&self, id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock();
        Self::load_book(&conn, id)
    }

    /// Get all books, oldest first.
    pub fn list_books(&self) -> Result<Vec<Book>> {
        self.query_books(
            &format!("SELECT {} FROM books ORDER BY created_at, rowid", BOOK_COLUMNS),
            None,
        )
    }

    /// Get the `limit` best rated books, highest average first.
    pub fn best_rated_books(&self, limit: usize) -> Result<Vec<Book>> {
        self.query_books(
            &format!(
                "SELECT {} FROM books ORDER BY average_rating DESC, created_at, rowid LIMIT ?1",
                BOOK_COLUMNS
            ),
            Some(limit as i64),
        )
    }

    /// Count stored books.
    pub fn count_books(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| AppError::Database(format!("Failed to count books: {}", e)))
    }

    /// Save the editable fields of an existing book. Ratings are not touched.
    pub fn update_book(&self, book: &Book) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET title = ?2, author = ?3, year = ?4, genre = ?5,
                        image_url = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    book.id,
                    book.title,
                    book.author,
                    book.year,
                    book.genre,
                    book.image_url,
                    now_timestamp(),
                ],
            )
            .map_err(|e| AppError::Database(format!("Failed to update book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a book and its ratings.
    pub fn delete_book(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Database(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    /// Record a rating and recompute the average in one transaction.
    ///
    /// Returns the updated book. Fails with `NotFound` for an unknown book and
    /// `Conflict` if the user already rated it.
    pub fn add_rating(&self, book_id: &str, user_id: &str, grade: u8) -> Result<Book> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut book = Self::load_book(&tx, book_id)?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", book_id)))?;

        rating::apply(&mut book, user_id, grade)?;

        // apply() pushed the new entry last
        if let Some(new_rating) = book.ratings.last() {
            Self::insert_rating(&tx, book_id, new_rating)?;
        }

        tx.execute(
            "UPDATE books SET average_rating = ?2, updated_at = ?3 WHERE id = ?1",
            params![book_id, book.average_rating, now_timestamp()],
        )
        .map_err(|e| AppError::Database(format!("Failed to update rating: {}", e)))?;

        tx.commit()
            .map_err(|e| AppError::Database(format!("Failed to commit rating: {}", e)))?;

        Ok(book)
    }

    fn insert_rating(conn: &Connection, book_id: &str, rating: &Rating) -> Result<()> {
        conn.execute(
            "INSERT INTO ratings (book_id, user_id, grade, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![book_id, rating.user_id, rating.grade, now_timestamp()],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!(
                    "User {} has already rated this book",
                    rating.user_id
                ))
            } else {
                AppError::Database(format!("Failed to save rating: {}", e))
            }
        })?;
        Ok(())
    }

    fn load_book(conn: &Connection, id: &str) -> Result<Option<Book>> {
        let book = conn
            .query_row(
                &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
                params![id],
                Self::row_to_book,
            )
            .optional()
            .map_err(|e| AppError::Database(format!("Failed to get book: {}", e)))?;

        let Some(mut book) = book else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT user_id, grade FROM ratings WHERE book_id = ?1 ORDER BY seq")
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        book.ratings = stmt
            .query_map(params![id], Self::row_to_rating)
            .map_err(|e| AppError::Database(format!("Failed to get ratings: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect ratings: {}", e)))?;

        Ok(Some(book))
    }

    /// Run a book query and attach ratings to every returned book.
    fn query_books(&self, sql: &str, limit: Option<i64>) -> Result<Vec<Book>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let rows = match limit {
            Some(limit) => stmt.query_map(params![limit], Self::row_to_book),
            None => stmt.query_map([], Self::row_to_book),
        };

        let mut books = rows
            .map_err(|e| AppError::Database(format!("Failed to get books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(format!("Failed to collect books: {}", e)))?;

        if books.is_empty() {
            return Ok(books);
        }

        let mut stmt = conn
            .prepare("SELECT book_id, user_id, grade FROM ratings ORDER BY seq")
            .map_err(|e| AppError::Database(format!("Failed to prepare query: {}", e)))?;

        let mut by_book: HashMap<String, Vec<Rating>> = HashMap::new();
        let ratings = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Rating {
                        user_id: row.get(1)?,
                        grade: row.get(2)?,
                    },
                ))
            })
            .map_err(|e| AppError::Database(format!("Failed to get ratings: {}", e)))?;

        for entry in ratings {
            let (book_id, rating) =
                entry.map_err(|e| AppError::Database(format!("Failed to read rating: {}", e)))?;
            by_book.entry(book_id).or_default().push(rating);
        }

        for book in &mut books {
            book.ratings = by_book.remove(&book.id).unwrap_or_default();
        }

        Ok(books)
    }

    fn row_to_book(row: &rusqlite::Row<'_>) -> rusqlite::Result<Book> {
        Ok(Book {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            author: row.get(3)?,
            year: row.get(4)?,
            genre: row.get(5)?,
            image_url: row.get(6)?,
            ratings: Vec::new(),
            average_rating: row.get(7)?,
        })
    }

    fn row_to_rating(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rating> {
        Ok(Rating {
            user_id: row.get(0)?,
            grade: row.get(1)?,
        })
    }
}
