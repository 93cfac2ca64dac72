//! Job handler stage machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a single job inside the handler.
///
/// `Received -> Decoding -> Inferring -> (SelectingAudio) -> Encoding -> Completed | Failed`.
/// Any non-terminal stage may move straight to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Received,
    Decoding,
    Inferring,
    SelectingAudio,
    Encoding,
    Completed,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Received => "received",
            JobStage::Decoding => "decoding",
            JobStage::Inferring => "inferring",
            JobStage::SelectingAudio => "selecting_audio",
            JobStage::Encoding => "encoding",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }

    pub fn can_transition_to(&self, next: JobStage) -> bool {
        use JobStage::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Received, Decoding) => true,
            (Decoding, Inferring) => true,
            (Inferring, SelectingAudio) | (Inferring, Encoding) => true,
            (SelectingAudio, Encoding) => true,
            (Encoding, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
