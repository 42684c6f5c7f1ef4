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

//! FreeBSD detector: a root `.profile` whose first line
//! carries the `# $FreeBSD: releng/<major>.<minor>` marker; arch comes
//! from the volume label.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::Result;

use super::{Detector, DetectionResult, OsType};
use crate::arch::linux_arch_from_str;
use crate::iso9660::IsoFs;

const MARKER: &str = "# $FreeBSD: releng/";

pub(crate) struct FreeBsdDetector;

impl Detector for FreeBsdDetector {
    fn detect(&self, iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
        let record = match iso.get_path(".profile") {
            Ok(r) => r,
            Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
            Err(e) => return Err(e),
        };
        let Ok(file) = record.try_into_file() else {
            return Ok(None);
        };
        let mut text = String::new();
        iso.read_file(&file)?.read_to_string(&mut text)?;

        let Some(first_line) = text.lines().next() else {
            return Ok(None);
        };
        if !first_line.starts_with(MARKER) {
            return Ok(None);
        }
        let version = extract_version(first_line);

        let volume_id = iso.volume_id().unwrap_or_default();
        let arch = volume_id
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(linux_arch_from_str)
        .find(|a| *a != crate::arch::Arch::Unknown)
        .unwrap_or(crate::arch::Arch::Unknown);

        Ok(Some(DetectionResult {
                    os_type: OsType::FreeBsd,
                    version,
                    flavor: String::new(),
                    languages: Vec::new(),
                    hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                    images: Vec::new(),
                }))
    }
}

/// Pull the `<major>.<minor>` substring following `releng/`.
fn extract_version(line: &str) -> String {
    let Some(idx) = line.find("releng/") else {
        return String::new();
    };
    let rest = &line[idx + "releng/".len()..];
    rest.split(|c: char| !(c.is_ascii_digit() || c == '.'))
    .next()
    .unwrap_or("")
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_releng_version() {
        assert_eq!(
            extract_version("# $FreeBSD: releng/13.2/release/... Exp $"),
            "13.2"
        );
    }

    #[test]
    fn non_matching_line_yields_empty_version() {
        assert_eq!(extract_version("not a marker line"), "");
    }
}
