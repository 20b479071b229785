//! Star rating validation and average aggregation.

use crate::error::{AppError, Result};
use crate::library::book::{Book, Rating};

/// Lowest accepted grade.
pub const MIN_GRADE: u8 = 1;

/// Highest accepted grade.
pub const MAX_GRADE: u8 = 5;

/// Parse a grade from a JSON value. Only whole numbers in `1..=5` pass.
pub fn parse_grade(value: Option<&serde_json::Value>) -> Result<u8> {
    let invalid = || {
        AppError::Validation(format!(
            "Rating must be a whole number between {} and {}",
            MIN_GRADE, MAX_GRADE
        ))
    };

    let number = value.and_then(|v| v.as_f64()).ok_or_else(invalid)?;
    if number.fract() != 0.0 || number < MIN_GRADE as f64 || number > MAX_GRADE as f64 {
        return Err(invalid());
    }

    Ok(number as u8)
}

/// Mean of all grades rounded half-up to one decimal, or 0 without ratings.
///
/// Computed in integer tenths so the result matches `round(sum / count, 1)`
/// exactly instead of drifting with float error.
pub fn average(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }

    let sum: u64 = ratings.iter().map(|r| r.grade as u64).sum();
    let count = ratings.len() as u64;
    let tenths = (20 * sum + count) / (2 * count);

    tenths as f64 / 10.0
}

/// Append a rating from `user_id` and recompute the book's average.
///
/// Fails with `Conflict` if the user has already rated the book; the book is
/// left untouched in that case.
pub fn apply(book: &mut Book, user_id: &str, grade: u8) -> Result<()> {
    if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
        return Err(AppError::Validation(format!(
            "Rating must be between {} and {}",
            MIN_GRADE, MAX_GRADE
        )));
    }

    if book.has_rating_from(user_id) {
        return Err(AppError::Conflict(format!(
            "User {} has already rated this book",
            user_id
        )));
    }

    book.ratings.push(Rating {
        user_id: user_id.to_string(),
        grade,
    });
    book.average_rating = average(&book.ratings);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book_with(grades: &[u8]) -> Book {
        Book {
            id: "book-1".to_string(),
            user_id: "owner".to_string(),
            title: "T".to_string(),
            author: "A".to_string(),
            year: 2001,
            genre: "G".to_string(),
            image_url: String::new(),
            ratings: grades
                .iter()
                .enumerate()
                .map(|(i, g)| Rating {
                    user_id: format!("user-{}", i),
                    grade: *g,
                })
                .collect(),
            average_rating: 0.0,
        }
    }

    #[test]
    fn parse_grade_bounds() {
        for g in 1..=5 {
            assert_eq!(parse_grade(Some(&json!(g))).unwrap(), g as u8);
        }
        assert!(parse_grade(Some(&json!(0))).is_err());
        assert!(parse_grade(Some(&json!(6))).is_err());
        assert!(parse_grade(Some(&json!(-1))).is_err());
        assert!(parse_grade(Some(&json!(2.5))).is_err());
        assert!(parse_grade(Some(&json!("4"))).is_err());
        assert!(parse_grade(Some(&json!(null))).is_err());
        assert!(parse_grade(None).is_err());
    }

    #[test]
    fn parse_grade_accepts_whole_float() {
        assert_eq!(parse_grade(Some(&json!(3.0))).unwrap(), 3);
    }

    #[test]
    fn average_empty_is_zero() {
        assert_eq!(average(&[]), 0.0);
    }

    #[test]
    fn average_rounds_half_up() {
        // 9 / 4 = 2.25
        assert_eq!(average(&book_with(&[1, 2, 3, 3]).ratings), 2.3);
        // 14 / 3 = 4.666...
        assert_eq!(average(&book_with(&[5, 5, 4]).ratings), 4.7);
        // 4 / 3 = 1.333...
        assert_eq!(average(&book_with(&[1, 1, 2]).ratings), 1.3);
    }

    #[test]
    fn new_average_matches_rounded_mean_for_every_grade() {
        let existing_sets: [&[u8]; 5] = [&[], &[5], &[1, 2], &[3, 3, 4], &[1, 5, 2, 4, 4, 3]];

        for existing in existing_sets {
            for g in MIN_GRADE..=MAX_GRADE {
                let mut book = book_with(existing);
                apply(&mut book, "newcomer", g).unwrap();

                let sum: u32 = existing.iter().map(|x| *x as u32).sum::<u32>() + g as u32;
                let n = existing.len() as f64 + 1.0;
                let expected = ((sum as f64 / n) * 10.0).round() / 10.0;

                assert!(
                    (book.average_rating - expected).abs() < 1e-9,
                    "existing={:?} g={} got={} expected={}",
                    existing,
                    g,
                    book.average_rating,
                    expected
                );
                assert_eq!(book.ratings.len(), existing.len() + 1);
                assert_eq!(book.ratings.last().unwrap().user_id, "newcomer");
            }
        }
    }

    #[test]
    fn duplicate_rating_conflicts_and_leaves_book_unchanged() {
        let mut book = book_with(&[4]);
        book.average_rating = 4.0;
        let before = book.clone();

        let result = apply(&mut book, "user-0", 1);
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(book, before);
    }

    #[test]
    fn out_of_range_grade_leaves_book_unchanged() {
        let mut book = book_with(&[2]);
        let before = book.clone();

        assert!(matches!(apply(&mut book, "x", 0), Err(AppError::Validation(_))));
        assert!(matches!(apply(&mut book, "x", 6), Err(AppError::Validation(_))));
        assert_eq!(book, before);
    }
}
