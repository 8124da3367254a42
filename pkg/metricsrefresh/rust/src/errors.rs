// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeKeyError {
    #[error("empty range key")]
    Empty,
    #[error("unrecognized range key: {raw}")]
    Unrecognized { raw: String },
    #[error("invalid date in range key {raw}: {date}")]
    InvalidDate { raw: String, date: String },
}

/// Failure of an underlying fetch. `Clone` because one failure is delivered
/// to every caller that joined the same in-flight fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch for {key} failed: {reason}")]
    Failed { key: String, reason: String },
    #[error("fetch timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },
}

impl FetchError {
    pub fn key(&self) -> Option<&str> {
        match self {
            FetchError::Failed { key, .. } => Some(key),
            FetchError::Timeout { .. } => None,
        }
    }
}
