//! CLI command implementations.
//!
//! Each submodule is a thin layer over [`sqlbox::SandboxManager`]; all
//! rendering lives in [`format`] as pure functions.

pub mod doctor;
pub mod exec;
pub mod format;
pub mod sandbox;
pub mod sweep;

use anyhow::Result;
use serde::Serialize;

/// Whether results print as colored text or JSON.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Prints `value` as JSON, or the `human` rendering of it.
    pub fn emit<T: Serialize>(self, value: &T, human: impl FnOnce(&T) -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", human(value));
        }
        Ok(())
    }
}
