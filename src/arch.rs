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

//! Architecture tables. Pure data, encoded as immutable sorted arrays
//! with binary search, same shape as the IANA/Windows timezone table in
//! `timezone.rs`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arch {
    X86,
    X64,
    Arm32,
    Arm64,
    Unknown,
}

impl Default for Arch {
    fn default() -> Self {
        Arch::Unknown
    }
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86 => "x86",
            Arch::X64 => "x64",
            Arch::Arm32 => "arm32",
            Arch::Arm64 => "arm64",
            Arch::Unknown => "unknown",
        }
    }
}

/// Windows WIM `ARCH` attribute values, keyed by the numeric
/// `PROCESSOR_ARCHITECTURE`-style code embedded in install.wim's XML
/// metadata. Unused codes map to `Unknown`.
const WINDOWS_ARCH_TABLE: &[(u32, Arch)] = &[
    (0, Arch::X86),
    (1, Arch::Unknown), // MIPS, retired
    (2, Arch::Unknown), // Alpha, retired
    (3, Arch::Unknown), // PowerPC, retired
    (5, Arch::Arm32),
    (6, Arch::Unknown), // IA64
    (9, Arch::X64),
    (10, Arch::Unknown), // IA32_ON_WIN64
    (11, Arch::Unknown),
    (12, Arch::Arm64),
];

pub fn windows_arch_from_code(code: u32) -> Arch {
    WINDOWS_ARCH_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, a)| *a)
        .unwrap_or(Arch::Unknown)
}

/// Linux arch substrings seen in `.treeinfo`/volume labels, sorted for
/// binary search over the normalized (lowercased) input.
const LINUX_ARCH_TABLE: &[(&str, Arch)] = &[
    ("aarch64", Arch::Arm64),
    ("amd64", Arch::X64),
    ("arm64", Arch::Arm64),
    ("armhfp", Arch::Arm32),
    ("i386", Arch::X86),
    ("i486", Arch::X86),
    ("i586", Arch::X86),
    ("i686", Arch::X86),
    ("i786", Arch::X86),
    ("i886", Arch::X86),
    ("i986", Arch::X86),
    ("noarch", Arch::Unknown),
    ("x86_64", Arch::X64),
];

pub fn linux_arch_from_str(s: &str) -> Arch {
    let needle = s.to_ascii_lowercase();
    LINUX_ARCH_TABLE
        .binary_search_by_key(&needle.as_str(), |(k, _)| k)
        .ok()
        .map(|i| LINUX_ARCH_TABLE[i].1)
        .unwrap_or(Arch::Unknown)
}

/// Variable spellings for `OS_ARCH`..`OS_ARCH6`, driven by the VM's
/// 64-bit-ness (not the detected ISO arch -- these describe what the
/// *guest OS install* should target, matching the installer's own
/// architecture once booted).
pub fn os_arch_variable(name: &str, is_64_bit: bool) -> Option<&'static str> {
    Some(match (name, is_64_bit) {
        ("OS_ARCH", true) => "amd64",
        ("OS_ARCH", false) => "x86",
        ("OS_ARCH2", true) => "x86_64",
        ("OS_ARCH2", false) => "x86",
        ("OS_ARCH3", true) => "x86_64",
        ("OS_ARCH3", false) => "i386",
        ("OS_ARCH4", true) => "64",
        ("OS_ARCH4", false) => "32",
        ("OS_ARCH6", true) => "x64",
        ("OS_ARCH6", false) => "x86",
        _ => return None,
    })
}

/// VM may run an x86 ISO on an x64 VM, but never the reverse, and never
/// across the arm/x86 family boundary.
pub fn is_compatible(vm_is_64_bit: bool, iso_arch: Arch) -> bool {
    match iso_arch {
        Arch::X86 => true,
        Arch::X64 => vm_is_64_bit,
        Arch::Arm32 => true,
        Arch::Arm64 => vm_is_64_bit,
        Arch::Unknown => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_code_table_round_trips_known_codes() {
        assert_eq!(windows_arch_from_code(0), Arch::X86);
        assert_eq!(windows_arch_from_code(9), Arch::X64);
        assert_eq!(windows_arch_from_code(5), Arch::Arm32);
        assert_eq!(windows_arch_from_code(12), Arch::Arm64);
        assert_eq!(windows_arch_from_code(255), Arch::Unknown);
    }

    #[test]
    fn linux_arch_lookup_is_case_insensitive() {
        assert_eq!(linux_arch_from_str("X86_64"), Arch::X64);
        assert_eq!(linux_arch_from_str("i686"), Arch::X86);
        assert_eq!(linux_arch_from_str("bogus"), Arch::Unknown);
    }

    #[test]
    fn x64_vm_can_run_x86_iso_but_not_reverse() {
        assert!(is_compatible(true, Arch::X86));
        assert!(!is_compatible(false, Arch::X64));
    }
}
