// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The declarative installation profile. Mutable until `prepare()`
//! freezes it; see `Orchestrator::prepare`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use crate::errors::{InvalidField, WrongOrder};

/// Read-only view of the declarative profile handed to template
/// expansion and installer variants. Everything here is a pure getter
/// over `Profile`; there is no derived state kept separately.
pub type ValueStore = Profile;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub installation_iso: PathBuf,
    pub additions_iso: Option<PathBuf>,
    pub install_additions: bool,
    pub validation_kit_iso: Option<PathBuf>,
    pub install_test_exec_service: bool,

    pub user_login: String,
    pub user_password: String,
    pub user_full_name: String,
    pub product_key: String,

    pub locale: String,
    pub language: String,
    pub country: String,
    pub time_zone: String,

    pub hostname: String,

    pub package_adjustments: BTreeSet<String>,
    pub post_install_command: String,
    pub extra_install_kernel_parameters: String,
    pub proxy: String,

    pub script_template_override: Option<PathBuf>,
    pub post_script_template_override: Option<PathBuf>,

    pub image_index: Option<u32>,
    pub auxiliary_base_path: PathBuf,
    pub avoid_updates_over_network: bool,

    /// Set once by `detect()`/`prepare()`; never part of the caller's
    /// serialized input, but along for the ride so a snapshot round-trips.
    #[serde(skip)]
    frozen: bool,
}

impl Profile {
    /// Load a profile from a TOML or JSON file, selected by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
        .map_err(|_| crate::errors::MissingFile(path.to_path_buf()))?;
        let profile = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&data)?,
            _ => toml::from_str(&data)?,
        };
        Ok(profile)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Called once by `Orchestrator::prepare` after validation succeeds.
    /// Any further attempt to mutate fields through the setters below
    /// fails with a wrong-order error; the struct's public fields remain
    /// directly readable (and, since `Profile` is plain data, directly
    /// writable by anyone holding a `&mut Profile` outside this crate's
    /// discipline) but `Orchestrator` never hands one out after freezing.
    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            bail!(WrongOrder {
                    attempted: "mutate profile",
                    required: "before prepare()",
                });
        }
        Ok(())
    }

    /// Effective user for `ROOT_PASSWORD`/`USER_FULL_NAME` fallbacks.
    pub fn effective_full_name(&self) -> &str {
        if self.user_full_name.is_empty() {
            &self.user_login
        } else {
            &self.user_full_name
        }
    }

    pub fn is_minimal_installation(&self) -> bool {
        self.package_adjustments.contains("minimal")
    }

    /// Validate all invariants from the data model section. Called by
    /// `Orchestrator::prepare` before freezing.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.installation_iso.as_os_str().is_empty(),
            InvalidField {
                field: "installation_iso",
                reason: "must be set".into(),
            }
        );
        if !self.installation_iso.exists() {
            bail!(crate::errors::MissingFile(self.installation_iso.clone()));
        }
        ensure!(
            !self.user_login.is_empty(),
            InvalidField {
                field: "user_login",
                reason: "must not be empty".into(),
            }
        );
        ensure!(
            !self.user_password.is_empty(),
            InvalidField {
                field: "user_password",
                reason: "must not be empty".into(),
            }
        );

        if !self.country.is_empty() {
            validate_country(&self.country)?;
        }
        if !self.locale.is_empty() {
            validate_locale(&self.locale, &self.language, &self.country)?;
        }
        if !self.hostname.is_empty() {
            validate_hostname(&self.hostname)?;
        }
        Ok(())
    }
}

/// Country must be exactly two uppercase ASCII letters.
pub fn validate_country(country: &str) -> Result<()> {
    ensure!(
        country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase()),
        InvalidField {
            field: "country",
            reason: format!("'{}' is not two uppercase letters", country),
        }
    );
    Ok(())
}

/// If `locale` is set it must be of the form `ll_CC` and must agree with
/// any separately-set `language`/`country` fields.
pub fn validate_locale(locale: &str, language: &str, country: &str) -> Result<()> {
    let (ll, cc) = locale.split_once('_').ok_or_else(|| {
            anyhow::Error::new(InvalidField {
                    field: "locale",
                    reason: format!("'{}' is not of the form ll_CC", locale),
                })
        })?;
    ensure!(
        ll.len() == 2 && ll.bytes().all(|b| b.is_ascii_lowercase()),
        InvalidField {
            field: "locale",
            reason: format!("'{}' language part must be two lowercase letters", locale),
        }
    );
    validate_country(cc).map_err(|_| {
            anyhow::Error::new(InvalidField {
                    field: "locale",
                    reason: format!("'{}' country part must be two uppercase letters", locale),
                })
        })?;
    if !language.is_empty() {
        ensure!(
            language.eq_ignore_ascii_case(ll),
            InvalidField {
                field: "locale",
                reason: format!("'{}' does not match language '{}'", locale, language),
            }
        );
    }
    if !country.is_empty() {
        ensure!(
            country == cc,
            InvalidField {
                field: "locale",
                reason: format!("'{}' does not match country '{}'", locale, country),
            }
        );
    }
    Ok(())
}

/// FQDN rules: total length <=253 (excluding a trailing dot, which is
/// itself rejected), each label <=63, each label starts with an
/// alphanumeric, at least two labels.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    ensure!(
        !hostname.ends_with('.'),
        InvalidField {
            field: "hostname",
            reason: "must not end with a trailing dot".into(),
        }
    );
    let labels: Vec<&str> = hostname.split('.').collect();
    ensure!(
        labels.len() >= 2,
        InvalidField {
            field: "hostname",
            reason: "must have at least two labels".into(),
        }
    );
    for label in &labels {
        ensure!(
            !label.is_empty() && label.len() <= 63,
            InvalidField {
                field: "hostname",
                reason: format!("label '{}' must be 1-63 characters", label),
            }
        );
        let first = label.as_bytes()[0];
        ensure!(
            first.is_ascii_alphanumeric(),
            InvalidField {
                field: "hostname",
                reason: format!("label '{}' must start with an alphanumeric", label),
            }
        );
        ensure!(
            label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-'),
            InvalidField {
                field: "hostname",
                reason: format!("label '{}' contains invalid characters", label),
            }
        );
    }
    ensure!(
        hostname.len() <= 253,
        InvalidField {
            field: "hostname",
            reason: "total length must be <=253 characters".into(),
        }
    );
    Ok(())
}

/// Split a validated hostname into (`without_domain`, `domain`).
pub fn split_hostname(hostname: &str) -> (&str, &str) {
    match hostname.split_once('.') {
        Some((first, rest)) => (first, rest),
        None => (hostname, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_accepts_simple_fqdn() {
        assert!(validate_hostname("vm.local").is_ok());
    }

    #[test]
    fn hostname_rejects_trailing_dot() {
        assert!(validate_hostname("vm.local.").is_err());
    }

    #[test]
    fn hostname_rejects_single_label() {
        assert!(validate_hostname("vm").is_err());
    }

    #[test]
    fn hostname_rejects_long_label() {
        let label = "a".repeat(64);
        assert!(validate_hostname(&format!("{label}.local")).is_err());
    }

    #[test]
    fn hostname_rejects_too_long_total() {
        let labels: Vec<String> = (0..10).map(|_| "a".repeat(30)).collect();
        let hostname = labels.join(".");
        assert!(hostname.len() > 253);
        assert!(validate_hostname(&hostname).is_err());
    }

    #[test]
    fn locale_must_match_language_and_country() {
        assert!(validate_locale("en_US", "en", "US").is_ok());
        assert!(validate_locale("en_US", "de", "US").is_err());
        assert!(validate_locale("en_US", "en", "DE").is_err());
        assert!(validate_locale("en-US", "", "").is_err());
    }

    #[test]
    fn split_hostname_separates_domain() {
        assert_eq!(split_hostname("vm.example.com"), ("vm", "example.com"));
        assert_eq!(split_hostname("vm"), ("vm", ""));
    }
}
