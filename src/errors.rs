// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed error kinds that callers need to match programmatically, on top
//! of the `anyhow::Error` chains everything else returns. Each is a plain
//! `thiserror` type; wrap with `.context(...)` for the human-readable
//! message and downcast with `anyhow::Error::is::<T>()` / `downcast_ref`
//! where a caller needs to branch on kind (the CLI, and the test suite).

use std::path::PathBuf;

/// The public operation was invoked before its precondition was met, e.g.
/// `constructMedia` before `prepare`.
#[derive(Debug, thiserror::Error)]
#[error("operation '{attempted}' requires '{required}' to have succeeded first")]
pub struct WrongOrder {
    pub attempted: &'static str,
    pub required: &'static str,
}

/// A `Profile` field failed validation.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for '{field}': {reason}")]
pub struct InvalidField {
    pub field: &'static str,
    pub reason: String,
}

/// A required input path does not exist.
#[derive(Debug, thiserror::Error)]
#[error("required file not found: {0}")]
pub struct MissingFile(pub PathBuf);

/// ISO metadata, template, splitter marker, or expression syntax failure.
/// Carries the byte offset of the offending placeholder when one is known.
#[derive(Debug, thiserror::Error)]
#[error("parse error: {message}{}", offset.map(|o| format!(" (at offset {o})")).unwrap_or_default())]
pub struct ParseError {
    pub message: String,
    pub offset: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: None,
        }
    }

    pub fn at(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset: Some(offset),
        }
    }
}

/// The detected guest OS has no installer variant, or its version is too
/// old for any variant we know about.
#[derive(Debug, thiserror::Error)]
#[error("unsupported guest OS: {0}")]
pub struct UnsupportedGuest(pub String);

/// The VM architecture cannot run the detected ISO's architecture.
#[derive(Debug, thiserror::Error)]
#[error("VM architecture '{vm_arch}' is incompatible with detected ISO architecture '{iso_arch}'")]
pub struct IncompatibleArch {
    pub vm_arch: String,
    pub iso_arch: String,
}

/// No free storage slot, a non-floppy device occupying floppy port 0/0,
/// or a storage bus beyond what this implementation models.
#[derive(Debug, thiserror::Error)]
#[error("storage topology error: {0}")]
pub struct StorageTopology(pub String);
