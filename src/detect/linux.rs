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

//! Linux detector: `.treeinfo`, then `.discinfo`, then
//! `README.diskdefines`, then `.disk/info`, with a Fedora volume-id
//! special case layered on top of whichever of those matched.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::Result;

use super::ini::Ini;
use super::{Detector, DetectionResult, OsType};
use crate::arch::{linux_arch_from_str, Arch};
use crate::iso9660::IsoFs;

pub(crate) struct LinuxDetector;

impl Detector for LinuxDetector {
    fn detect(&self, iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
        let mut result = from_treeinfo(iso)?
        .or(from_discinfo(iso)?)
        .or(from_diskdefines(iso)?)
        .or(from_disk_info(iso)?);

        if let Some(fedora) = from_fedora_volume_id(iso)? {
            result = Some(match result {
                    Some(mut r) => {
                        if r.os_type == OsType::Unknown {
                            r.os_type = fedora.os_type;
                        }
                        if r.version.is_empty() {
                            r.version = fedora.version;
                        }
                        if r.flavor.is_empty() {
                            r.flavor = fedora.flavor;
                        }
                        r.hints.extend(fedora.hints);
                        r
                    }
                    None => fedora,
                });
        }

        Ok(result)
    }
}

/// Oracle Linux's `OsType` variant is keyed on the major release, parsed
/// from the leading digits of `version`; an unparseable or missing
/// version falls back to the newest supported release, OL9.
fn oracle_linux_variant(version: &str) -> OsType {
    let major: String = version.chars().take_while(|c| c.is_ascii_digit()).collect();
    match major.as_str() {
        "6" => OsType::OracleLinux6,
        "7" => OsType::OracleLinux7,
        "8" => OsType::OracleLinux8,
        _ => OsType::OracleLinux9,
    }
}

fn distro_from_name(name: &str, version: &str) -> OsType {
    let n = name.to_lowercase();
    if n.contains("fedora") {
        OsType::Fedora
    } else if n.contains("centos") {
        OsType::CentOs
    } else if n.contains("oracle") {
        oracle_linux_variant(version)
    } else if n.contains("opensuse") {
        OsType::OpenSuse
    } else if n.contains("redhat") || n.contains("red hat") {
        OsType::RedHat
    } else if n.contains("linux mint") {
        OsType::LinuxMint
    } else if n.contains("xubuntu") || n.contains("kubuntu") || n.contains("lubuntu") || n.contains("ubuntu") {
        OsType::Ubuntu
    } else if n.contains("debian") {
        OsType::Debian
    } else {
        OsType::Unknown
    }
}

fn from_treeinfo(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let Some(text) = read_text(iso, ".treeinfo")? else {
        return Ok(None);
    };
    let ini = Ini::parse(&text);

    let arch_str = ini
    .get("tree", "arch")
    .or_else(|| ini.get("general", "arch"))
    .unwrap_or("");
    let arch = linux_arch_from_str(arch_str);

    let name = ini
    .get("release", "name")
    .or_else(|| ini.get("product", "name"))
    .or_else(|| ini.get("general", "family"))
    .unwrap_or("");
    let version = ini
    .get("release", "version")
    .or_else(|| ini.get("product", "version"))
    .or_else(|| ini.get("general", "version"))
    .unwrap_or("")
    .to_string();

    Ok(Some(DetectionResult {
                os_type: distro_from_name(name, &version),
                version,
                flavor: String::new(),
                languages: Vec::new(),
                hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                images: Vec::new(),
            }))
}

fn from_discinfo(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let Some(text) = read_text(iso, ".discinfo")? else {
        return Ok(None);
    };
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 3 {
        return Ok(None);
    }
    let product_version = lines[1].trim();
    let arch_str = lines[2].trim();
    let arch = linux_arch_from_str(arch_str);

    let (name, version) = match product_version.rsplit_once(' ') {
        Some((name, version)) => (name, version),
        None => (product_version, ""),
    };

    Ok(Some(DetectionResult {
                os_type: distro_from_name(name, version),
                version: version.to_string(),
                flavor: String::new(),
                languages: Vec::new(),
                hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                images: Vec::new(),
            }))
}

fn from_diskdefines(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let Some(text) = read_text(iso, "README.diskdefines")? else {
        return Ok(None);
    };
    let mut diskname = String::new();
    let mut arch_str = String::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("#define ") else {
            continue;
        };
        if let Some(v) = rest.strip_prefix("DISKNAME ") {
            diskname = v.trim().trim_matches('"').to_string();
        } else if let Some(v) = rest.strip_prefix("ARCH ") {
            arch_str = v.trim().trim_matches('"').to_string();
        }
    }
    let arch = linux_arch_from_str(&arch_str);

    Ok(Some(DetectionResult {
                os_type: distro_from_name(&diskname, ""),
                version: String::new(),
                flavor: String::new(),
                languages: Vec::new(),
                hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                images: Vec::new(),
            }))
}

fn from_disk_info(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let Some(text) = read_text(iso, ".disk/info")? else {
        return Ok(None);
    };
    let product = text.lines().next().unwrap_or("").trim();

    let arch = volume_id(iso)?
    .map(|vol| find_arch_substring(&vol))
    .unwrap_or(Arch::Unknown);

    Ok(Some(DetectionResult {
                os_type: distro_from_name(product, ""),
                version: String::new(),
                flavor: String::new(),
                languages: Vec::new(),
                hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                images: Vec::new(),
            }))
}

fn find_arch_substring(haystack: &str) -> Arch {
    for token in haystack.split(|c: char| !c.is_ascii_alphanumeric()) {
        let arch = linux_arch_from_str(token);
        if arch != Arch::Unknown {
            return arch;
        }
    }
    Arch::Unknown
}

fn from_fedora_volume_id(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let Some(vol) = volume_id(iso)? else {
        return Ok(None);
    };
    let Some(rest) = vol.strip_prefix("Fedora-") else {
        return Ok(None);
    };

    let parts: Vec<&str> = rest.split('-').collect();
    if parts.is_empty() {
        return Ok(None);
    }

    let (flavor, arch, version) = match parts.len() {
        n if n >= 3 => (parts[0].to_string(), linux_arch_from_str(parts[1]), parts[2..].join("-")),
        2 => (parts[0].to_string(), Arch::Unknown, parts[1].to_string()),
        _ => (parts[0].to_string(), Arch::Unknown, String::new()),
    };

    let arch = if arch == Arch::Unknown {
        probe_fedora_arch(iso)?
    } else {
        arch
    };

    Ok(Some(DetectionResult {
                os_type: OsType::Fedora,
                version,
                flavor,
                languages: Vec::new(),
                hints: BTreeMap::from([("ARCH".to_string(), arch.as_str().to_string())]),
                images: Vec::new(),
            }))
}

/// Probe the kernel's PE machine field, or an EFI loader filename, when
/// the volume id lacked an arch component.
fn probe_fedora_arch(iso: &mut IsoFs) -> Result<Arch> {
    for path in ["images/pxeboot/vmlinuz", "isolinux/vmlinuz"] {
        if let Some(arch) = probe_pe_machine(iso, path)? {
            return Ok(arch);
        }
    }
    for path in ["EFI/BOOT/grubaa64.efi", "EFI/BOOT/BOOTAA64.EFI"] {
        if read_exists(iso, path)? {
            return Ok(Arch::Arm64);
        }
    }
    Ok(Arch::Unknown)
}

/// Read the MZ/PE header of a kernel image and map its machine field.
fn probe_pe_machine(iso: &mut IsoFs, path: &str) -> Result<Option<Arch>> {
    let record = match iso.get_path(path) {
        Ok(r) => r,
        Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
        Err(e) => return Err(e),
    };
    let Ok(file) = record.try_into_file() else {
        return Ok(None);
    };

    let mut mz = [0u8; 64];
    {
        let mut reader = iso.read_file(&file)?;
        if reader.read_exact(&mut mz).is_err() {
            return Ok(None);
        }
    }
    if &mz[0..2] != b"MZ" {
        return Ok(None);
    }
    let pe_offset = u32::from_le_bytes(mz[60..64].try_into().unwrap()) as usize;

    let mut header = vec![0u8; pe_offset + 6];
    {
        let mut reader = iso.read_file(&file)?;
        if reader.read_exact(&mut header).is_err() {
            return Ok(None);
        }
    }
    if &header[pe_offset..pe_offset + 4] != b"PE\0\0" {
        return Ok(None);
    }
    let machine = u16::from_le_bytes(header[pe_offset + 4..pe_offset + 6].try_into().unwrap());
    Ok(Some(match machine {
                0x014c => Arch::X86, // IMAGE_FILE_MACHINE_I386
                0x8664 => Arch::X64, // IMAGE_FILE_MACHINE_AMD64
                0xaa64 => Arch::Arm64,
                0x01c4 | 0x01c0 => Arch::Arm32,
                _ => return Ok(None),
            }))
}

fn read_exists(iso: &mut IsoFs, path: &str) -> Result<bool> {
    match iso.get_path(path) {
        Ok(_) => Ok(true),
        Err(e) if e.is::<crate::iso9660::NotFound>() => Ok(false),
        Err(e) => Err(e),
    }
}

fn volume_id(iso: &mut IsoFs) -> Result<Option<String>> {
    let id = iso.volume_id()?;
    if id.is_empty() {
        Ok(None)
    } else {
        Ok(Some(id))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distro_name_matching_is_case_insensitive() {
        assert_eq!(distro_from_name("Fedora Server", ""), OsType::Fedora);
        assert_eq!(distro_from_name("CentOS Stream", ""), OsType::CentOs);
        assert_eq!(distro_from_name("Kubuntu", ""), OsType::Ubuntu);
        assert_eq!(distro_from_name("Linux Mint", ""), OsType::LinuxMint);
        assert_eq!(distro_from_name("something else", ""), OsType::Unknown);
    }

    #[test]
    fn oracle_linux_variant_keyed_on_major_version() {
        assert_eq!(distro_from_name("Oracle Linux Server", "6.10"), OsType::OracleLinux6);
        assert_eq!(distro_from_name("Oracle Linux Server", "7.9"), OsType::OracleLinux7);
        assert_eq!(distro_from_name("Oracle Linux Server", "8.9"), OsType::OracleLinux8);
        assert_eq!(distro_from_name("Oracle Linux Server", "9.3"), OsType::OracleLinux9);
        assert_eq!(distro_from_name("Oracle Linux Server", ""), OsType::OracleLinux9);
    }

    #[test]
    fn arch_substring_search_finds_known_token() {
        assert_eq!(find_arch_substring("Fedora-Server-dvd-x86_64-38"), Arch::X64);
        assert_eq!(find_arch_substring("nothing-here"), Arch::Unknown);
    }
}
