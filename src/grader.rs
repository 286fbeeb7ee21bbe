//! Grading of query output against reference answers.
//!
//! The default [`ShallowGrader`] is a cardinality and column-presence check.
//! It never compares values, row order or types.

use tracing::debug;

use crate::instance::Difficulty;
use crate::seed::{ReferenceAnswer, SeedCatalog};
use crate::Row;

/// A strategy deciding whether actual rows answer a question.
pub trait Grader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// True if `actual` is accepted as an answer to `expected`.
    fn grade(&self, expected: &ReferenceAnswer, actual: &[Row]) -> bool;
}

/// Correct iff the row counts match and every key of the first expected row
/// is present in the first actual row.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShallowGrader;

impl Grader for ShallowGrader {
    fn name(&self) -> &'static str {
        "shallow"
    }

    fn grade(&self, expected: &ReferenceAnswer, actual: &[Row]) -> bool {
        let (Some(first_expected), Some(first_actual)) = (expected.rows.first(), actual.first())
        else {
            return false;
        };
        if expected.rows.len() != actual.len() {
            return false;
        }
        first_expected
            .keys()
            .all(|key| first_actual.contains_key(key))
    }
}

/// Grades `actual` against the catalog's answer for a question.
///
/// A question without a known answer grades as false.
pub fn grade(
    catalog: &SeedCatalog,
    grader: &dyn Grader,
    difficulty: Difficulty,
    question_id: u32,
    actual: &[Row],
) -> bool {
    let Some(expected) = catalog.answer(difficulty, question_id) else {
        debug!("No reference answer for {} question {}", difficulty, question_id);
        return false;
    };
    let verdict = grader.grade(expected, actual);
    debug!(
        "Graded {} question {} with {} grader: {}",
        difficulty,
        question_id,
        grader.name(),
        verdict
    );
    verdict
}
