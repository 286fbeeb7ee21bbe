use anyhow::Result;

use sqlbox::{Difficulty, SandboxManager};

use super::format::format_query_result;
use super::Output;

/// Runs one statement, grading it when a question and tier are named.
pub async fn run(
    manager: &SandboxManager,
    id: &str,
    sql: &str,
    question: Option<u32>,
    difficulty: Option<Difficulty>,
    owner: Option<&str>,
    out: Output,
) -> Result<()> {
    let result = match owner {
        Some(owner) => {
            manager
                .execute_owned(id, owner, sql, question, difficulty)
                .await?
        }
        None => manager.execute(id, sql, question, difficulty).await?,
    };
    out.emit(&result, format_query_result)
}
