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

//! ISO OS-detection pipeline. A chain of detectors --
//! Windows, Linux, OS/2, FreeBSD -- tried in order; the first one that
//! sets a non-`Unknown` `OsType` wins, and later detectors may only
//! narrow the version/flavor of that result, never replace its `OsType`
//! (detector monotonicity).

mod freebsd;
mod ini;
mod linux;
mod os2;
mod windows;

use std::collections::BTreeMap;
use std::fs::File;

use anyhow::Result;

use crate::arch::Arch;
use crate::iso9660::IsoFs;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OsType {
    Unknown,

    WindowsNt3,
    WindowsNt4,
    Windows2000,
    WindowsXp,
    Windows2003,
    WindowsVista,
    Windows7,
    Windows8,
    Windows81,
    Windows10,
    Windows11,
    WindowsServer2008,
    WindowsServer2012,
    WindowsServer2016,
    WindowsServer2019,
    WindowsServer2022,

    Os2Generic,
    ArcaOs,
    Ecs,

    Debian,
    Ubuntu,
    LinuxMint,
    OpenSuse,
    RedHat,
    CentOs,
    Fedora,
    OracleLinux6,
    OracleLinux7,
    OracleLinux8,
    OracleLinux9,

    FreeBsd,
}

impl Default for OsType {
    fn default() -> Self {
        OsType::Unknown
    }
}

impl OsType {
    pub fn is_windows(self) -> bool {
        matches!(
            self,
            OsType::WindowsNt3
            | OsType::WindowsNt4
            | OsType::Windows2000
            | OsType::WindowsXp
            | OsType::Windows2003
            | OsType::WindowsVista
            | OsType::Windows7
            | OsType::Windows8
            | OsType::Windows81
            | OsType::Windows10
            | OsType::Windows11
            | OsType::WindowsServer2008
            | OsType::WindowsServer2012
            | OsType::WindowsServer2016
            | OsType::WindowsServer2019
            | OsType::WindowsServer2022
        )
    }

    /// Windows NT5 (SIF-based unattended setup) vs NT6+ (XML-based).
    pub fn is_windows_nt5(self) -> bool {
        matches!(
            self,
            OsType::WindowsNt3
            | OsType::WindowsNt4
            | OsType::Windows2000
            | OsType::WindowsXp
            | OsType::Windows2003
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub index: u32,
    pub name: String,
    pub version: String,
    pub arch: Arch,
    pub flavor: String,
    pub languages: Vec<String>,
    pub default_language: Option<String>,
    pub os_type: OsType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub os_type: OsType,
    pub version: String,
    pub flavor: String,
    pub languages: Vec<String>,
    pub hints: BTreeMap<String, String>,
    pub images: Vec<ImageInfo>,
}

impl DetectionResult {
    pub fn major_version(&self) -> &str {
        self.version.split('.').next().unwrap_or(&self.version)
    }

    /// Merge a later, narrower detector's findings into this result.
    /// Never broadens `os_type` once it has been set to something other
    /// than `Unknown` -- this is the detector-chain monotonicity
    /// invariant.
    fn narrow_with(&mut self, other: DetectionResult) {
        if self.os_type == OsType::Unknown {
            self.os_type = other.os_type;
        }
        if self.version.is_empty() {
            self.version = other.version;
        }
        if self.flavor.is_empty() {
            self.flavor = other.flavor;
        }
        if self.languages.is_empty() {
            self.languages = other.languages;
        }
        if self.images.is_empty() {
            self.images = other.images;
        }
        self.hints.extend(other.hints);
    }
}

/// One step of the detector chain. Returning `Ok(None)` means "this
/// detector found nothing applicable"; `Ok(Some(_))` may still carry
/// `OsType::Unknown` if the detector partially matched (e.g. recognized
/// an ISO layout but couldn't pin down a specific distro).
pub(crate) trait Detector {
    fn detect(&self, iso: &mut IsoFs) -> Result<Option<DetectionResult>>;
}

/// Runs the Windows, Linux, OS/2, FreeBSD detectors in order against an
/// already-open ISO, returning the combined, monotonically-narrowed result.
/// Used directly by callers (such as [`crate::orchestrator::Orchestrator`])
/// that need to keep the `IsoFs` handle open past detection, e.g. to read
/// further files from it while authoring aux media.
pub fn detect_os_from_iso(iso: &mut IsoFs) -> Result<DetectionResult> {
    let detectors: Vec<Box<dyn Detector>> = vec![
        Box::new(windows::WindowsDetector),
        Box::new(linux::LinuxDetector),
        Box::new(os2::Os2Detector),
        Box::new(freebsd::FreeBsdDetector),
    ];

    let mut result = DetectionResult::default();
    for detector in &detectors {
        if let Some(found) = detector.detect(iso)? {
            result.narrow_with(found);
        }
        if result.os_type != OsType::Unknown {
            // Still run later detectors: they may only narrow, so there's
            // no harm, but there's also nothing left to decide once a
            // specific OS family has already been found by an earlier,
            // higher-priority detector in the chain order (Windows, then
            // Linux, then OS/2, then FreeBSD).
            break;
        }
    }

    Ok(result)
}

/// Opens `iso_path` and runs [`detect_os_from_iso`] against it, falling
/// back to a filename-based language guess when no detector recognized
/// anything at all.
pub fn detect_os(iso_path: &std::path::Path) -> Result<DetectionResult> {
    let file = File::open(iso_path)
    .map_err(|_| crate::errors::MissingFile(iso_path.to_path_buf()))?;
    let mut iso = IsoFs::from_file(file)?;

    let mut result = detect_os_from_iso(&mut iso)?;
    if result.os_type == OsType::Unknown && result.languages.is_empty() {
        result.languages = vec![guess_language_from_filename(iso_path)];
    }

    Ok(result)
}

/// Fallback language guess from the ISO filename's leading two-letter
/// prefix (e.g. `en_windows10.iso` -> `en_US`), used when every detector
/// fails outright.
fn guess_language_from_filename(iso_path: &std::path::Path) -> String {
    let stem = iso_path
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or("");
    let prefix: String = stem.chars().take(2).collect();
    if prefix.len() == 2 && prefix.chars().all(|c| c.is_ascii_alphabetic()) {
        format!("{}_US", prefix.to_lowercase())
    } else {
        "en_US".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_with_never_overwrites_known_os_type() {
        let mut result = DetectionResult {
            os_type: OsType::Fedora,
            version: "38".into(),
            ..Default::default()
        };
        result.narrow_with(DetectionResult {
                os_type: OsType::Debian,
                version: "12".into(),
                ..Default::default()
            });
        assert_eq!(result.os_type, OsType::Fedora);
        assert_eq!(result.version, "38");
    }

    #[test]
    fn filename_guess_extracts_two_letter_prefix() {
        assert_eq!(
            guess_language_from_filename(std::path::Path::new("de-win10.iso")),
            "de_US"
        );
        assert_eq!(
            guess_language_from_filename(std::path::Path::new("1.iso")),
            "en_US"
        );
    }
}
