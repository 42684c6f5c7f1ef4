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

//! OS/2 detector. `OS2SE20.SRC` at the root names the
//! image tree (default `\OS2IMAGE`); `<tree>/DISK_0/OS2LDR` must exist
//! for the media to be recognized as OS/2 at all. ArcaOS and eCS are
//! distinguished by a marker directory under the tree; anything else
//! with a valid `OS2LDR` falls back to generic OS/2, versioned from
//! `SYSLEVEL.OS2`'s BCD-encoded table.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::Result;

use super::{Detector, DetectionResult, OsType};
use crate::iso9660::IsoFs;

const DEFAULT_TREE: &str = "OS2IMAGE";

pub(crate) struct Os2Detector;

impl Detector for Os2Detector {
    fn detect(&self, iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
        let Some(src) = read_text(iso, "OS2SE20.SRC")? else {
            return Ok(None);
        };
        let tree = src.trim().trim_start_matches('\\');
        let tree = if tree.is_empty() { DEFAULT_TREE } else { tree };

        let loader_path = format!("{tree}/DISK_0/OS2LDR");
        if !exists(iso, &loader_path)? {
            return Ok(None);
        }

        if exists(iso, &format!("{tree}/AOSBOOT"))? {
            let version = read_text(iso, &format!("{tree}/SYS/ARCANOAE.FLG"))?
            .map(|s| parse_arcaos_version(&s))
            .unwrap_or_default();
            return Ok(Some(os2_result(OsType::ArcaOs, version, tree)));
        }

        if exists(iso, &format!("{tree}/ECS"))? {
            let version = read_text(iso, &format!("{tree}/ECS/ECS_INST.FLG"))?
            .map(|s| s.lines().next().unwrap_or("").trim().to_string())
            .unwrap_or_default();
            return Ok(Some(os2_result(OsType::Ecs, version, tree)));
        }

        for disk in ["DISK_2", "DISK_1"] {
            let path = format!("{tree}/{disk}/SYSLEVEL.OS2");
            if let Some(bytes) = read_bytes(iso, &path)? {
                if let Some(version) = parse_syslevel_version(&bytes) {
                    return Ok(Some(os2_result(OsType::Os2Generic, version, tree)));
                }
            }
        }

        Ok(Some(os2_result(OsType::Os2Generic, String::new(), tree)))
    }
}

/// The image-tree path is recorded as a detection hint (`OS2SE20.SRC`,
/// example) so the OS/2 installer variant can find the same
/// `DISK_0..DISK_2` files without re-reading `OS2SE20.SRC` itself.
fn os2_result(os_type: OsType, version: String, tree: &str) -> DetectionResult {
    let mut hints = BTreeMap::new();
    hints.insert("OS2SE20.SRC".to_string(), format!("\\{tree}"));
    DetectionResult {
        os_type,
        version,
        flavor: String::new(),
        languages: Vec::new(),
        hints,
        images: Vec::new(),
    }
}

/// `ARCANOAE.FLG` is two lines: `ArcaOS <version>` and `Built <date>`.
/// Strip the leading product name and fold the build line in with one
/// space.
fn parse_arcaos_version(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines
    .next()
    .unwrap_or("")
    .trim()
    .strip_prefix("ArcaOS")
    .unwrap_or("")
    .trim()
    .to_string();
    match lines.next() {
        Some(second) if second.trim().starts_with("Built") => {
            format!("{} {}", first, second.trim())
        }
        _ => first,
    }
}

const SYSLEVEL_HEADER_SIZE: usize = 0x16;

/// `SYSLEVEL.OS2` is a fixed header followed by a version table whose
/// first two bytes are BCD nibbles: byte 0 is major.minor, byte 1 is the
/// refresh level.
fn parse_syslevel_version(bytes: &[u8]) -> Option<String> {
    if bytes.len() < SYSLEVEL_HEADER_SIZE + 2 {
        return None;
    }
    let major_minor = bytes[SYSLEVEL_HEADER_SIZE];
    let refresh = bytes[SYSLEVEL_HEADER_SIZE + 1];
    let major = major_minor >> 4;
    let minor = major_minor & 0x0f;
    let refresh = bcd_to_decimal(refresh);
    if refresh == 0 {
        Some(format!("{major}.{minor}"))
    } else {
        Some(format!("{major}.{minor}.{refresh}"))
    }
}

fn bcd_to_decimal(b: u8) -> u32 {
    ((b >> 4) as u32) * 10 + (b & 0x0f) as u32
}

fn exists(iso: &mut IsoFs, path: &str) -> Result<bool> {
    match iso.get_path(path) {
        Ok(_) => Ok(true),
        Err(e) if e.is::<crate::iso9660::NotFound>() => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_text(iso: &mut IsoFs, path: &str) -> Result<Option<String>> {
    let record = match iso.get_path(path) {
        Ok(r) => r,
        Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Ok(file) = record.try_into_file() else {
        return Ok(None);
    };
    let mut data = String::new();
    iso.read_file(&file)?.read_to_string(&mut data)?;
    Ok(Some(data))
}

fn read_bytes(iso: &mut IsoFs, path: &str) -> Result<Option<Vec<u8>>> {
    let record = match iso.get_path(path) {
        Ok(r) => r,
        Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Ok(file) = record.try_into_file() else {
        return Ok(None);
    };
    let mut data = Vec::new();
    iso.read_file(&file)?.read_to_end(&mut data)?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arcaos_version_folds_build_line() {
        let text = "ArcaOS 5.0.8\nBuilt 2023-01-15\n";
        assert_eq!(parse_arcaos_version(text), "5.0.8 Built 2023-01-15");
    }

    #[test]
    fn arcaos_version_without_build_line() {
        assert_eq!(parse_arcaos_version("ArcaOS 5.0.8\n"), "5.0.8");
    }

    #[test]
    fn syslevel_version_decodes_bcd_nibbles() {
        let mut bytes = vec![0u8; SYSLEVEL_HEADER_SIZE + 2];
        bytes[SYSLEVEL_HEADER_SIZE] = 0x41; // major 4, minor 1
        bytes[SYSLEVEL_HEADER_SIZE + 1] = 0x25; // refresh 25
        assert_eq!(parse_syslevel_version(&bytes).as_deref(), Some("4.1.25"));
    }

    #[test]
    fn syslevel_version_rejects_truncated_buffer() {
        assert_eq!(parse_syslevel_version(&[0u8; 4]), None);
    }
}
