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

//! Tiny INI reader for the section-keyed metadata files detectors scan
//! (`.treeinfo`, `idwbinfo.txt`, `PRODSPEC.INI`, ...). Not a general-
//! purpose INI library: no escaping, no multi-line values, first
//! assignment for a duplicate key wins.

use std::collections::BTreeMap;

use regex::Regex;

#[derive(Debug, Default, Clone)]
pub struct Ini {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Ini {
    pub fn parse(text: &str) -> Self {
        let section_re = Regex::new(r"^\[(.+)\]$").unwrap();
        let kv_re = Regex::new(r"^([^=;#]+?)\s*=\s*(.*)$").unwrap();

        let mut ini = Ini::default();
        let mut section = String::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = section_re.captures(line) {
                section = caps[1].trim().to_string();
                ini.sections.entry(section.clone()).or_default();
                continue;
            }
            if let Some(caps) = kv_re.captures(line) {
                ini.sections
                    .entry(section.clone())
                    .or_default()
                    .entry(caps[1].trim().to_string())
                    .or_insert_with(|| caps[2].trim().to_string());
            }
        }
        ini
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(|s| s.as_str())
    }

    pub fn section(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(section)
    }
}
