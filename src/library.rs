//! Book documents and rating aggregation.

pub mod book;
pub mod rating;

pub use book::{Book, BookFields, BookPatch, NewBook, Rating};
