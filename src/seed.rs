//! Seed catalog: per-tier initialization scripts and reference answers.
//!
//! Scripts are embedded at build time. A directory of `init_<tier>.sql`
//! files may override individual tiers at load time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::instance::Difficulty;
use crate::Row;

const EASY_SCRIPT: &str = include_str!("../seeds/init_easy.sql");
const MEDIUM_SCRIPT: &str = include_str!("../seeds/init_medium.sql");
const HARD_SCRIPT: &str = include_str!("../seeds/init_hard.sql");
const ANSWERS: &str = include_str!("../seeds/answers.json");

/// Expected result set for one practice question.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAnswer {
    /// Tier the question belongs to
    pub difficulty: Difficulty,
    /// Question number within the tier
    pub question_id: u32,
    /// Expected rows
    pub rows: Vec<Row>,
}

/// Versioned seed scripts and the reference answer table.
#[derive(Debug, Clone)]
pub struct SeedCatalog {
    scripts: HashMap<Difficulty, String>,
    answers: HashMap<(Difficulty, u32), ReferenceAnswer>,
}

impl SeedCatalog {
    /// Catalog built only from the embedded scripts and answers.
    pub fn embedded() -> Self {
        let scripts = HashMap::from([
            (Difficulty::Easy, EASY_SCRIPT.to_string()),
            (Difficulty::Medium, MEDIUM_SCRIPT.to_string()),
            (Difficulty::Hard, HARD_SCRIPT.to_string()),
        ]);

        let answers = parse_answers(ANSWERS).expect("embedded answers are valid");

        Self { scripts, answers }
    }

    /// Embedded catalog with tiers overridden by `init_<tier>.sql` files in `dir`.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut catalog = Self::embedded();
        let Some(dir) = dir else {
            return Ok(catalog);
        };

        for difficulty in Difficulty::ALL {
            let path = dir.join(format!("init_{difficulty}.sql"));
            if !path.exists() {
                continue;
            }
            let script = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed script: {}", path.display()))?;
            debug!("Using seed override for {}: {}", difficulty, path.display());
            catalog.scripts.insert(difficulty, script);
        }

        let answers_path = dir.join("answers.json");
        if answers_path.exists() {
            let content = fs::read_to_string(&answers_path).with_context(|| {
                format!("Failed to read answers file: {}", answers_path.display())
            })?;
            catalog.answers = parse_answers(&content).with_context(|| {
                format!("Failed to parse answers file: {}", answers_path.display())
            })?;
        }

        Ok(catalog)
    }

    /// Full script text for a tier.
    pub fn script(&self, difficulty: Difficulty) -> &str {
        self.scripts.get(&difficulty).map_or("", String::as_str)
    }

    /// The tier's script split into executable statements.
    pub fn statements(&self, difficulty: Difficulty) -> Vec<String> {
        split_statements(self.script(difficulty))
    }

    /// Reference answer for a question, if one is known.
    pub fn answer(&self, difficulty: Difficulty, question_id: u32) -> Option<&ReferenceAnswer> {
        self.answers.get(&(difficulty, question_id))
    }
}

impl Default for SeedCatalog {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Parses `{ "<tier>": { "<question id>": [ {row}, ... ] } }`.
fn parse_answers(content: &str) -> Result<HashMap<(Difficulty, u32), ReferenceAnswer>> {
    let raw: HashMap<Difficulty, HashMap<u32, Vec<Row>>> =
        serde_json::from_str(content).context("Invalid reference answer table")?;

    let mut answers = HashMap::new();
    for (difficulty, questions) in raw {
        for (question_id, rows) in questions {
            answers.insert(
                (difficulty, question_id),
                ReferenceAnswer {
                    difficulty,
                    question_id,
                    rows,
                },
            );
        }
    }
    Ok(answers)
}

/// Scanner position within a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Splits a script on `;`.
///
/// Terminators inside quoted strings, `--`/`#` line comments and `/* */`
/// block comments are ignored. Backslash escapes are honoured inside `'` and
/// `"` strings. Chunks holding only whitespace or comments are dropped;
/// comments before a statement stay attached to it.
pub fn split_statements(script: &str) -> Vec<String> {
    let chars: Vec<char> = script.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = Scan::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            Scan::Code => match c {
                ';' => {
                    if has_code {
                        statements.push(current.trim().to_string());
                    }
                    current.clear();
                    has_code = false;
                    i += 1;
                    continue;
                }
                '#' => state = Scan::LineComment,
                // MySQL only treats `--` as a comment when whitespace follows
                '-' if next == Some('-')
                    && chars.get(i + 2).map_or(true, |c| c.is_whitespace()) =>
                {
                    state = Scan::LineComment;
                }
                '/' if next == Some('*') => {
                    current.push_str("/*");
                    state = Scan::BlockComment;
                    i += 2;
                    continue;
                }
                '\'' | '"' | '`' => {
                    state = Scan::Quoted(c);
                    has_code = true;
                }
                c if !c.is_whitespace() => has_code = true,
                _ => {}
            },
            Scan::Quoted(q) => {
                if c == '\\' && q != '`' {
                    current.push(c);
                    if let Some(escaped) = next {
                        current.push(escaped);
                    }
                    i += 2;
                    continue;
                }
                if c == q {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '*' && next == Some('/') {
                    current.push_str("*/");
                    state = Scan::Code;
                    i += 2;
                    continue;
                }
            }
        }
        current.push(c);
        i += 1;
    }
    if has_code {
        statements.push(current.trim().to_string());
    }

    statements
}
