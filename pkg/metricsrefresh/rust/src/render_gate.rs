// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::debug;
use serde::Serialize;

/// Skips re-rendering a chart or table when the data it would draw has not
/// changed since the last render of the same target.
///
/// Signatures are opaque to the gate; see [`signature_of`] for the usual way
/// to build one.
#[derive(Debug, Default)]
pub struct RenderGate {
    last_seen: HashMap<String, String>,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records `signature` unless `force` is off and the
    /// target was last rendered with this exact signature, in which case
    /// nothing is recorded.
    pub fn should_render(&mut self, target: &str, signature: &str, force: bool) -> bool {
        if !force && self.last_seen.get(target).is_some_and(|s| s == signature) {
            debug!("render of {target} skipped, signature unchanged");
            return false;
        }
        self.last_seen
            .insert(target.to_string(), signature.to_string());
        true
    }

    pub fn last_signature(&self, target: &str) -> Option<&str> {
        self.last_seen.get(target).map(String::as_str)
    }

    /// Forgets a target, e.g. when its widget is torn down. The next
    /// `should_render` for it returns `true`.
    pub fn forget(&mut self, target: &str) -> bool {
        self.last_seen.remove(target).is_some()
    }

    pub fn reset(&mut self) {
        self.last_seen.clear();
    }
}

/// Digest of exactly the data a visual draws plus the active style/config
/// digest. Object keys are ordered before hashing, so maps with the same
/// content always produce the same signature.
pub fn signature_of<T: Serialize + ?Sized>(
    value: &T,
    style_digest: &str,
) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_string(&serde_json::to_value(value)?)?;
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    style_digest.hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}
