//! Priority levels for task scheduling

use serde::{Deserialize, Serialize};

/// Priority level for submitted tasks
///
/// Totally ordered: `Background < UserVisible < UserBlocking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Background,
    #[default]
    UserVisible,
    UserBlocking,
}

impl Priority {
    /// Ordinal rank of this level, 0 (lowest) through 2 (highest)
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::UserVisible => 1,
            Self::UserBlocking => 2,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::UserVisible => write!(f, "user-visible"),
            Self::UserBlocking => write!(f, "user-blocking"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "user-visible" => Ok(Self::UserVisible),
            "user-blocking" => Ok(Self::UserBlocking),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
