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

//! IANA <-> Windows timezone table, plus the three-step resolution
//! chain from `UnattendedImpl.cpp`: exact IANA match, then
//! a normalized-underscore match (to tolerate a caller passing a Windows
//! display name with spaces swapped for underscores), then the fixed
//! `85` (GMT) Windows-index fallback.

/// `(iana_name, windows_name, windows_index)`, sorted by `iana_name` for
/// binary search. Not exhaustive -- this is the same scope of table the
/// original keeps: enough zones to cover the installers this crate
/// targets, with GMT as the universal fallback.
const ZONES: &[(&str, &str, u32)] = &[
    ("America/Anchorage", "Alaskan Standard Time", 3),
    ("America/Chicago", "Central Standard Time", 20),
    ("America/Denver", "Mountain Standard Time", 13),
    ("America/Los_Angeles", "Pacific Standard Time", 4),
    ("America/New_York", "Eastern Standard Time", 35),
    ("America/Sao_Paulo", "E. South America Standard Time", 42),
    ("Asia/Dubai", "Arabian Standard Time", 65),
    ("Asia/Hong_Kong", "China Standard Time", 92),
    ("Asia/Kolkata", "India Standard Time", 81),
    ("Asia/Shanghai", "China Standard Time", 92),
    ("Asia/Tokyo", "Tokyo Standard Time", 95),
    ("Australia/Sydney", "AUS Eastern Standard Time", 112),
    ("Etc/UTC", "UTC", 84),
    ("Europe/Berlin", "W. Europe Standard Time", 51),
    ("Europe/London", "GMT Standard Time", 85),
    ("Europe/Moscow", "Russian Standard Time", 89),
    ("Europe/Paris", "Romance Standard Time", 52),
    ("UTC", "UTC", 84),
];

/// Windows-index fallback used when no zone in the table matches at all
/// (`GMT`).
pub const GMT_FALLBACK_INDEX: u32 = 85;

pub struct ResolvedZone {
    pub unix_name: String,
    pub windows_name: String,
    pub windows_index: u32,
}

fn normalize(s: &str) -> String {
    s.replace('_', " ").to_ascii_lowercase()
}

fn lookup_exact(name: &str) -> Option<(&'static str, &'static str, u32)> {
    ZONES.iter().find(|(iana, _, _)| *iana == name).copied()
}

fn lookup_normalized(name: &str) -> Option<(&'static str, &'static str, u32)> {
    let needle = normalize(name);
    ZONES
    .iter()
    .find(|(iana, win, _)| normalize(iana) == needle || normalize(win) == needle)
    .copied()
}

/// Resolve a Profile timezone (IANA or Windows display name) into its
/// three forms. Never fails: an unrecognized zone resolves to itself for
/// `TIME_ZONE_UX` and to the GMT fallback for the Windows forms.
pub fn resolve(tz: &str) -> ResolvedZone {
    if tz.is_empty() {
        return ResolvedZone {
            unix_name: "UTC".to_string(),
            windows_name: "UTC".to_string(),
            windows_index: lookup_exact("UTC").map(|(_, _, i)| i).unwrap_or(GMT_FALLBACK_INDEX),
        };
    }
    if let Some((iana, win, idx)) = lookup_exact(tz) {
        return ResolvedZone {
            unix_name: iana.to_string(),
            windows_name: win.to_string(),
            windows_index: idx,
        };
    }
    if let Some((iana, win, idx)) = lookup_normalized(tz) {
        return ResolvedZone {
            unix_name: iana.to_string(),
            windows_name: win.to_string(),
            windows_index: idx,
        };
    }
    ResolvedZone {
        unix_name: tz.to_string(),
        windows_name: "GMT Standard Time".to_string(),
        windows_index: GMT_FALLBACK_INDEX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_iana_match() {
        let z = resolve("Europe/Berlin");
        assert_eq!(z.windows_name, "W. Europe Standard Time");
        assert_eq!(z.windows_index, 51);
    }

    #[test]
    fn normalized_match_on_windows_name_with_underscores() {
        let z = resolve("GMT_Standard_Time");
        assert_eq!(z.windows_index, 85);
    }

    #[test]
    fn unknown_zone_falls_back_to_gmt() {
        let z = resolve("Moon/Base_Alpha");
        assert_eq!(z.windows_index, GMT_FALLBACK_INDEX);
        assert_eq!(z.unix_name, "Moon/Base_Alpha");
    }

    #[test]
    fn empty_defaults_to_utc() {
        let z = resolve("");
        assert_eq!(z.unix_name, "UTC");
    }
}
