//! Build identity and outcome
//!
//! Outcomes are ordered from best to worst: SUCCESS < UNSTABLE < FAILURE.
//! An outcome may only ever be worsened once assigned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build number, unique and strictly increasing within a project.
pub type BuildNumber = u32;

/// Three-valued build result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Build passed
    Success,
    /// Build completed but tests failed
    Unstable,
    /// Build failed
    Failure,
}

impl Outcome {
    /// Counts toward the last-successful anchor.
    pub fn is_successful(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Counts toward the last-stable anchor (anything that did not fail).
    pub fn is_stable(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Unstable)
    }

    /// Combine with another outcome, keeping the worse of the two.
    pub fn combine(self, other: Outcome) -> Outcome {
        self.max(other)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "SUCCESS",
            Outcome::Unstable => "UNSTABLE",
            Outcome::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Error parsing an outcome name.
#[derive(Debug, thiserror::Error)]
#[error("unknown build outcome '{0}' (expected success, unstable or failure)")]
pub struct ParseOutcomeError(String);

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "unstable" => Ok(Outcome::Unstable),
            "failure" | "failed" => Ok(Outcome::Failure),
            _ => Err(ParseOutcomeError(s.to_string())),
        }
    }
}

/// A build being published.
///
/// The outcome comes from the scheduler; archiving may only worsen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    number: BuildNumber,
    outcome: Outcome,
}

impl Build {
    /// Create a build handle with its scheduler-assigned outcome.
    pub fn new(number: BuildNumber, outcome: Outcome) -> Self {
        Self { number, outcome }
    }

    pub fn number(&self) -> BuildNumber {
        self.number
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Worsen the outcome. Never improves it.
    pub fn worsen(&mut self, outcome: Outcome) {
        self.outcome = self.outcome.combine(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_ordering() {
        assert!(Outcome::Success < Outcome::Unstable);
        assert!(Outcome::Unstable < Outcome::Failure);
    }

    #[test]
    fn test_outcome_predicates() {
        assert!(Outcome::Success.is_successful());
        assert!(Outcome::Success.is_stable());
        assert!(!Outcome::Unstable.is_successful());
        assert!(Outcome::Unstable.is_stable());
        assert!(!Outcome::Failure.is_stable());
    }

    #[test]
    fn test_worsen_never_improves() {
        let mut build = Build::new(3, Outcome::Failure);
        build.worsen(Outcome::Success);
        assert_eq!(build.outcome(), Outcome::Failure);

        let mut build = Build::new(4, Outcome::Unstable);
        build.worsen(Outcome::Failure);
        assert_eq!(build.outcome(), Outcome::Failure);
    }

    #[test]
    fn test_outcome_parse_and_serde() {
        assert_eq!("Success".parse::<Outcome>().unwrap(), Outcome::Success);
        assert_eq!("failed".parse::<Outcome>().unwrap(), Outcome::Failure);
        assert!("aborted".parse::<Outcome>().is_err());

        let json = serde_json::to_string(&Outcome::Unstable).unwrap();
        assert_eq!(json, "\"UNSTABLE\"");
    }
}
