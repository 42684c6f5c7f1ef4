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

//! Windows detector. `sources/install.wim` is the
//! primary source of truth; its embedded XML metadata gives us one
//! `ImageInfo` per installable image. WIM resource-table parsing and
//! LZX/XPRESS decompression are treated as an external capability this
//! crate doesn't reimplement: we only read the
//! header fields needed to locate the uncompressed XML blob, and refuse
//! compressed metadata outright.
//!
//! Older media (pre-Vista) fall back to a chain of plain-text/INI files.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

use super::ini::Ini;
use super::{Detector, DetectionResult, ImageInfo, OsType};
use crate::arch::{windows_arch_from_code, Arch};
use crate::errors::ParseError;
use crate::iso9660::IsoFs;

/// Metadata parsing is rejected above this size; a legitimate WIM XML
/// blob is a few KiB, so this is a generous cap against a corrupt or
/// hostile image.
const MAX_XML_SIZE: u64 = 32 * 1024 * 1024;

const WIM_MAGIC: &[u8; 8] = b"MSWIM\0\0\0";
const XML_RESHDR_OFFSET: usize = 72;
const RESHDR_FLAG_COMPRESSED: u8 = 0x02;

pub(crate) struct WindowsDetector;

impl Detector for WindowsDetector {
    fn detect(&self, iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
        if let Some(result) = detect_from_wim(iso)? {
            return Ok(Some(result));
        }
        if let Some(result) = detect_from_legacy_files(iso)? {
            return Ok(Some(result));
        }
        Ok(None)
    }
}

fn detect_from_wim(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    let record = match iso.get_path("sources/install.wim") {
        Ok(r) => r,
        Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
        Err(e) => return Err(e),
    };
    let file = record
    .try_into_file()
    .context("sources/install.wim is not a file")?;

    let mut header = vec![0u8; 208];
    {
        let mut reader = iso.read_file(&file)?;
        reader
        .read_exact(&mut header)
        .context("reading install.wim header")?;
    }
    if &header[0..8] != WIM_MAGIC {
        bail!(ParseError::new("sources/install.wim has an unrecognized header"));
    }

    let reshdr = &header[XML_RESHDR_OFFSET..XML_RESHDR_OFFSET + 24];
    let flags = reshdr[7];
    let offset = u64::from_le_bytes(reshdr[8..16].try_into().unwrap());
    let original_size = u64::from_le_bytes(reshdr[16..24].try_into().unwrap());

    if flags & RESHDR_FLAG_COMPRESSED != 0 {
        bail!(ParseError::new(
                "install.wim XML metadata is compressed; only uncompressed metadata is supported"
            ));
    }
    if original_size > MAX_XML_SIZE {
        bail!(ParseError::new(format!(
                    "install.wim XML metadata is {original_size} bytes, exceeding the 32 MiB cap"
                )));
    }

    let mut xml_bytes = vec![0u8; original_size as usize];
    {
        let mut reader = iso.read_file(&file)?;
        let mut skip = vec![0u8; offset as usize];
        reader.read_exact(&mut skip).context("seeking to XML metadata")?;
        reader
        .read_exact(&mut xml_bytes)
        .context("reading XML metadata")?;
    }

    let xml = decode_utf16le(&xml_bytes)?;
    let images = parse_wim_xml(&xml)?;
    if images.is_empty() {
        return Ok(None);
    }

    let languages: Vec<String> = images
    .first()
    .map(|i| i.languages.clone())
    .unwrap_or_default();
    let best = images.first().cloned().unwrap_or_default();

    Ok(Some(DetectionResult {
                os_type: best.os_type,
                version: best.version.clone(),
                flavor: best.flavor.clone(),
                languages,
                hints: BTreeMap::new(),
                images,
            }))
}

fn decode_utf16le(bytes: &[u8]) -> Result<String> {
    let bytes = if bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xFE {
        &bytes[2..]
    } else {
        bytes
    };
    let units: Vec<u16> = bytes
    .chunks_exact(2)
    .map(|c| u16::from_le_bytes([c[0], c[1]]))
    .collect();
    String::from_utf16(&units).context("decoding UTF-16LE XML metadata")
}

/// Extract one `ImageInfo` per `<IMAGE INDEX="...">` element. `DISPLAYNAME`
/// takes priority over `NAME` when present; older images lack
/// `DISPLAYNAME` entirely and we don't attempt to normalize that.
fn parse_wim_xml(xml: &str) -> Result<Vec<ImageInfo>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut images = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut languages: Vec<String> = Vec::new();
    let mut default_language: Option<String> = None;
    let mut current_index: Option<u32> = None;
    let mut buf = Vec::new();

    loop {
        match reader
        .read_event_into(&mut buf)
        .map_err(|e| ParseError::new(format!("invalid install.wim XML: {e}")))?
        {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_uppercase();
                if name == "IMAGE" {
                    fields.clear();
                    languages.clear();
                    default_language = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref().eq_ignore_ascii_case(b"INDEX") {
                            current_index = String::from_utf8_lossy(&attr.value).parse().ok();
                        }
                    }
                }
                path.push(name);
            }
            Event::Text(t) => {
                let text = t
                .unescape()
                .map_err(|e| ParseError::new(format!("invalid install.wim XML: {e}")))?
                .trim()
                .to_string();
                if text.is_empty() {
                    continue;
                }
                let joined = path.join("/");
                if joined.ends_with("LANGUAGES/LANGUAGE") {
                    languages.push(text);
                } else if joined.ends_with("LANGUAGES/DEFAULT") {
                    default_language = Some(text);
                } else {
                    fields.insert(joined, text);
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_uppercase();
                if name == "IMAGE" {
                    if let Some(index) = current_index.take() {
                        images.push(build_image_info(index, &fields, &languages, &default_language));
                    }
                }
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(images)
}

fn build_image_info(
    index: u32,
    fields: &HashMap<String, String>,
    languages: &[String],
    default_language: &Option<String>,
) -> ImageInfo {
    let get = |suffix: &str| -> Option<&String> {
        fields.iter().find(|(k, _)| k.ends_with(suffix)).map(|(_, v)| v)
    };

    let name = get("DISPLAYNAME")
    .or_else(|| get("/NAME"))
    .or_else(|| get("NAME"))
    .cloned()
    .unwrap_or_default();
    let flavor = get("EDITIONID")
    .or_else(|| get("FLAGS"))
    .cloned()
    .unwrap_or_default();
    let arch = get("WINDOWS/ARCH")
    .and_then(|s| s.parse::<u32>().ok())
    .map(windows_arch_from_code)
    .unwrap_or(Arch::Unknown);
    let major: u32 = get("VERSION/MAJOR").and_then(|s| s.parse().ok()).unwrap_or(0);
    let minor: u32 = get("VERSION/MINOR").and_then(|s| s.parse().ok()).unwrap_or(0);
    let build: u32 = get("VERSION/BUILD").and_then(|s| s.parse().ok()).unwrap_or(0);
    let spbuild: u32 = get("VERSION/SPBUILD").and_then(|s| s.parse().ok()).unwrap_or(0);
    let version = if spbuild > 0 {
        format!("{major}.{minor}.{build}.{spbuild}")
    } else {
        format!("{major}.{minor}.{build}")
    };
    let os_type = windows_os_type_from_version(major, minor, build, &flavor);

    ImageInfo {
        index,
        name,
        version,
        arch,
        flavor,
        languages: languages.to_vec(),
        default_language: default_language.clone(),
        os_type,
    }
}

/// Version-range compare mapping (major, minor, build) to an `OsType`.
/// Server variants upgrade a workstation-range match when the flavor
/// string contains "server".
fn windows_os_type_from_version(major: u32, minor: u32, build: u32, flavor: &str) -> OsType {
    let is_server = flavor.to_lowercase().contains("server");
    let v = (major, minor, build);
    if v >= (10, 0, 22000) {
        return if is_server {
            OsType::WindowsServer2022
        } else {
            OsType::Windows11
        };
    }
    if v >= (10, 0, 20348) && is_server {
        return OsType::WindowsServer2022;
    }
    if v >= (10, 0, 17763) && is_server {
        return OsType::WindowsServer2019;
    }
    if v >= (10, 0, 14393) && is_server {
        return OsType::WindowsServer2016;
    }
    if v >= (10, 0, 0) {
        return if is_server {
            OsType::WindowsServer2016
        } else {
            OsType::Windows10
        };
    }
    if v >= (6, 3, 0) {
        return if is_server {
            OsType::WindowsServer2012
        } else {
            OsType::Windows81
        };
    }
    if v >= (6, 2, 0) {
        return if is_server {
            OsType::WindowsServer2012
        } else {
            OsType::Windows8
        };
    }
    if v >= (6, 1, 0) {
        return if is_server {
            OsType::WindowsServer2008
        } else {
            OsType::Windows7
        };
    }
    if v >= (6, 0, 0) {
        return if is_server {
            OsType::WindowsServer2008
        } else {
            OsType::WindowsVista
        };
    }
    OsType::Unknown
}

/// Pre-Vista fallback chain: `idwbinfo.txt`, then `HIVESYS.INF`, then
/// `PRODSPEC.INI`, then `TXTSETUP.{SIF,INF}`.
fn detect_from_legacy_files(iso: &mut IsoFs) -> Result<Option<DetectionResult>> {
    if let Some(text) = read_text(iso, "sources/idwbinfo.txt")? {
        let ini = Ini::parse(&text);
        let arch = ini
        .get("BUILDINFO", "BuildArch")
        .map(|a| crate::arch::linux_arch_from_str(a))
        .unwrap_or(Arch::Unknown);
        return Ok(Some(DetectionResult {
                    os_type: OsType::WindowsVista,
                    version: String::new(),
                    flavor: String::new(),
                    languages: Vec::new(),
                    hints: BTreeMap::from([("BUILD_ARCH".to_string(), arch.as_str().to_string())]),
                    images: Vec::new(),
                }));
    }

    for candidate in ["AMD64/HIVESYS.INF", "I386/HIVESYS.INF"] {
        if let Some(text) = read_text(iso, candidate)? {
            let ini = Ini::parse(&text);
            if let Some(driver_ver) = ini.get("Version", "DriverVer") {
                let (os_type, version) = parse_hivesys_driver_ver(driver_ver);
                return Ok(Some(DetectionResult {
                            os_type,
                            version,
                            flavor: String::new(),
                            languages: Vec::new(),
                            hints: BTreeMap::new(),
                            images: Vec::new(),
                        }));
            }
        }
    }

    for candidate in ["I386/TXTSETUP.SIF", "I386/TXTSETUP.INF"] {
        if read_text(iso, candidate)?.is_some() {
            return Ok(Some(DetectionResult {
                        os_type: OsType::WindowsNt4,
                        version: String::new(),
                        flavor: String::new(),
                        languages: Vec::new(),
                        hints: BTreeMap::new(),
                        images: Vec::new(),
                    }));
        }
    }

    Ok(None)
}

/// `DriverVer` is `mm/dd/yyyy,<version>`; map the version component to
/// an NT5-era release.
fn parse_hivesys_driver_ver(driver_ver: &str) -> (OsType, String) {
    let version = driver_ver
    .split(',')
    .nth(1)
    .unwrap_or("")
    .trim()
    .to_string();
    let os_type = match version.as_str() {
        v if v.starts_with("5.2") => OsType::Windows2003,
        v if v.starts_with("5.1") => OsType::WindowsXp,
        v if v.starts_with("5.0") => OsType::Windows2000,
        _ => OsType::WindowsNt4,
    };
    (os_type, version)
}

fn read_text(iso: &mut IsoFs, path: &str) -> Result<Option<String>> {
    let record = match iso.get_path(path) {
        Ok(r) => r,
        Err(e) if e.is::<crate::iso9660::NotFound>() => return Ok(None),
        Err(e) => return Err(e),
    };
    let file = match record.try_into_file() {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };
    let mut data = String::new();
    iso.read_file(&file)?.read_to_string(&mut data)?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ranges_map_to_releases() {
        assert_eq!(windows_os_type_from_version(6, 1, 0, ""), OsType::Windows7);
        assert_eq!(
            windows_os_type_from_version(6, 1, 0, "ServerStandard"),
            OsType::WindowsServer2008
        );
        assert_eq!(windows_os_type_from_version(10, 0, 19041, ""), OsType::Windows10);
        assert_eq!(windows_os_type_from_version(10, 0, 22000, ""), OsType::Windows11);
    }

    #[test]
    fn hivesys_driver_ver_maps_xp() {
        let (os_type, version) = parse_hivesys_driver_ver("07/01/2001,5.1.2600.0");
        assert_eq!(os_type, OsType::WindowsXp);
        assert_eq!(version, "5.1.2600.0");
    }

    #[test]
    fn parse_wim_xml_extracts_images() {
        let xml = r#"<WIM>
        <IMAGE INDEX="1">
        <NAME>WindowsServer2022</NAME>
        <FLAGS>ServerStandard</FLAGS>
        <WINDOWS>
        <ARCH>9</ARCH>
        <VERSION><MAJOR>10</MAJOR><MINOR>0</MINOR><BUILD>20348</BUILD></VERSION>
        <LANGUAGES><LANGUAGE>en-US</LANGUAGE><DEFAULT>en-US</DEFAULT></LANGUAGES>
        </WINDOWS>
        </IMAGE>
        </WIM>"#;
        let images = parse_wim_xml(xml).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].index, 1);
        assert_eq!(images[0].arch, Arch::X64);
        assert_eq!(images[0].version, "10.0.20348");
        assert_eq!(images[0].os_type, OsType::WindowsServer2022);
        assert_eq!(images[0].languages, vec!["en-US".to_string()]);
        assert_eq!(images[0].default_language.as_deref(), Some("en-US"));
    }
}
