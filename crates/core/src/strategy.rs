//! Strategy interpretation capability.
//!
//! Turning free-form user instructions into a structured content strategy
//! is delegated to an external LLM. This module only defines the record
//! that comes back and the trait a concrete client implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Target clip length in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
    pub optimal: u32,
}

/// A content strategy extracted from user instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredStrategy {
    pub name: String,
    pub content_type: String,
    pub target_audience: String,
    pub target_duration: DurationRange,
    #[serde(default)]
    pub psychological_triggers: Vec<String>,
    #[serde(default)]
    pub custom_requirements: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// The backing service could not be reached or refused the call.
    #[error("Strategy service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the answer did not describe a strategy.
    #[error("Could not interpret instructions: {0}")]
    Uninterpretable(String),
}

/// Something that can turn instructions into a [`StructuredStrategy`].
#[async_trait]
pub trait StrategyInterpreter: Send + Sync {
    async fn interpret(&self, instructions: &str) -> Result<StructuredStrategy, StrategyError>;
}
