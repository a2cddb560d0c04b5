//! Core identifier types for dispatch runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one dispatch run.
///
/// Generated when a run starts and carried by its report and log lines so
/// that progress from concurrent runs can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Creates a fresh random run identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display() {
        let id = RunId::from("run-1");
        assert_eq!(id.to_string(), "run-1");
    }

    #[test]
    fn generated_run_ids_are_distinct() {
        let a = RunId::generate();
        let b = RunId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a.0).is_ok());
    }
}
