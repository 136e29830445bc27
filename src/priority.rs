//! Job prioritization for controlling execution order in the eligibility index.
//!
//! Priorities are strictly ordered: the index always surfaces higher priority
//! jobs before lower priority ones, with creation time breaking ties. There is
//! no weighted sampling; a queue's representative is simply its most eligible
//! member.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Job priority levels that determine eligibility ordering.
///
/// Higher priority jobs are surfaced to workers before lower priority jobs.
/// On equal priority, the earlier-created job wins.
///
/// # Examples
///
/// ```rust
/// use jobsmith::JobPriority;
/// use std::str::FromStr;
///
/// let priority = JobPriority::from_str("high").unwrap();
/// assert_eq!(priority, JobPriority::High);
/// assert_eq!(priority.as_i32(), 3);
///
/// assert!(JobPriority::Critical > JobPriority::High);
/// assert!(JobPriority::Normal > JobPriority::Background);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum JobPriority {
    /// Background jobs - lowest priority, execute when no other jobs are available.
    Background = 0,

    /// Low priority jobs - execute after normal and higher priority jobs.
    Low = 1,

    /// Normal priority jobs - the default priority level.
    #[default]
    Normal = 2,

    /// High priority jobs - execute before normal and lower priority jobs.
    High = 3,

    /// Critical priority jobs - highest priority, surfaced ahead of everything else.
    Critical = 4,
}

impl JobPriority {
    /// Gets the numeric value of the priority for storage and comparison.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Creates a JobPriority from an i32 value, as loaded from a storage backend.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use jobsmith::JobPriority;
    ///
    /// assert_eq!(JobPriority::from_i32(0).unwrap(), JobPriority::Background);
    /// assert_eq!(JobPriority::from_i32(4).unwrap(), JobPriority::Critical);
    /// assert!(JobPriority::from_i32(10).is_err());
    /// ```
    pub fn from_i32(value: i32) -> Result<Self, PriorityError> {
        match value {
            0 => Ok(JobPriority::Background),
            1 => Ok(JobPriority::Low),
            2 => Ok(JobPriority::Normal),
            3 => Ok(JobPriority::High),
            4 => Ok(JobPriority::Critical),
            _ => Err(PriorityError::InvalidPriorityValue(value)),
        }
    }

    /// Gets the priority name as a lowercase string.
    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Background => "background",
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = PriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "background" => Ok(JobPriority::Background),
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "critical" => Ok(JobPriority::Critical),
            _ => Err(PriorityError::InvalidPriorityName(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur when working with job priorities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriorityError {
    #[error("Invalid priority value: {0}. Valid values are 0-4")]
    InvalidPriorityValue(i32),

    #[error("Invalid priority name: {0}. Valid names are background, low, normal, high, critical")]
    InvalidPriorityName(String),
}
