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

//! Installer variants: per-guest-family logic that turns a
//! Profile plus the unattended script templates into the aux floppy or
//! VISO an installer actually boots from. `variant_for` maps a detected
//! `OsType` onto one of the families below; `InstallerVariant` carries the
//! per-run state (parsed templates, the paths it has written so far so a
//! mid-build failure can roll them all back).

pub mod fat12;
pub mod kargs;
pub mod os2_bootsector;
pub mod viso;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use uuid::Uuid;

use crate::detect::OsType;
use crate::errors::{MissingFile, ParseError, UnsupportedGuest};
use crate::iso9660::IsoFs;
use crate::template::{splitter, TemplateContext, TemplateEngine};
use crate::vmcontext::VmContext;
use viso::VisoBuilder;

/// Which family of unattended-install mechanics a detected guest maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    WindowsSif,
    WindowsXml,
    Os2,
    DebianUbuntu,
    RhelFamily,
    FreeBsd,
}

/// Map a detected OS to its installer family, or `None` if there isn't
/// one -- an unsupported or too-old guest.
pub fn variant_for(os_type: OsType) -> Option<VariantKind> {
    use OsType::*;
    match os_type {
        WindowsNt4 | Windows2000 | WindowsXp | Windows2003 => Some(VariantKind::WindowsSif),
        WindowsVista | Windows7 | Windows8 | Windows81 | Windows10 | Windows11
        | WindowsServer2008 | WindowsServer2012 | WindowsServer2016 | WindowsServer2019
        | WindowsServer2022 => Some(VariantKind::WindowsXml),
        Os2Generic | ArcaOs | Ecs => Some(VariantKind::Os2),
        Debian | Ubuntu | LinuxMint => Some(VariantKind::DebianUbuntu),
        RedHat | CentOs | Fedora | OracleLinux6 | OracleLinux7 | OracleLinux8 | OracleLinux9 => {
            Some(VariantKind::RhelFamily)
        }
        FreeBsd => Some(VariantKind::FreeBsd),
        WindowsNt3 | OpenSuse | Unknown => None,
    }
}

/// Which aux media a variant needs attached before the VM boots, given
/// the target VM's firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequirements {
    pub floppy: bool,
    pub iso: bool,
    pub iso_is_viso: bool,
}

/// Per-variant token patterns stripped from the boot menu's kernel
/// parameter line before the install-time parameters are appended; kept
/// as a table rather than inlined in each builder so the mapping is easy
/// to audit in one place.
struct KargsRemoveTable {
    kind: VariantKind,
    remove_patterns: &'static [&'static str],
}

const KARGS_REMOVE_TABLE: &[KargsRemoveTable] = &[
    KargsRemoveTable {
        kind: VariantKind::DebianUbuntu,
        remove_patterns: &[],
    },
    KargsRemoveTable {
        kind: VariantKind::RhelFamily,
        remove_patterns: &["rd.live.check"],
    },
];

fn remove_patterns_for(kind: VariantKind) -> &'static [&'static str] {
    KARGS_REMOVE_TABLE
    .iter()
    .find(|e| e.kind == kind)
    .map(|e| e.remove_patterns)
    .unwrap_or(&[])
}

const DEFAULT_WINDOWS_SIF: &str = include_str!("templates/winnt.sif.tmpl");
const DEFAULT_WINDOWS_XML: &str = include_str!("templates/autounattend.xml.tmpl");
const DEFAULT_OS2_RESPONSE: &str = include_str!("templates/os2_response.tmpl");
const DEFAULT_DEBIAN_PRESEED: &str = include_str!("templates/preseed.cfg.tmpl");
const DEFAULT_RHEL_KICKSTART: &str = include_str!("templates/kickstart.cfg.tmpl");
const DEFAULT_FREEBSD_INSTALLERCONFIG: &str = include_str!("templates/installerconfig.tmpl");
const DEFAULT_POST_SCRIPT: &str = include_str!("templates/postinstall.sh.tmpl");

/// The curated OS/2 install-tree files copied onto the floppy verbatim,
/// by floppy-visible 8.3 name and the candidate ISO basenames searched
/// for it (earliest match across `DISK_0..DISK_2` wins); `OS2LDR` itself
/// is handled separately since it needs the IDIV patch applied.
const OS2_VERBATIM_SLOTS: &[(&str, &[&str])] = &[
    ("CONFIG.SYS", &["CONFIG.SYS"]),
    ("OS2LDR.MSG", &["OS2LDR.MSG"]),
    ("OS2KRNL", &["OS2KRNL", "OS2KRNLI"]),
    ("OS2DUMP", &["OS2DUMP"]),
    ("OS2BOOT", &["OS2BOOT"]),
];

pub struct InstallerVariant {
    kind: VariantKind,
    os_type: OsType,
    aux_floppy_path: PathBuf,
    aux_iso_path: PathBuf,
    main_template: Option<TemplateEngine>,
    post_template: Option<TemplateEngine>,
    created_aux_paths: Vec<PathBuf>,
}

impl InstallerVariant {
    /// Resolve the installer variant for a detected guest, erroring out
    /// for guests with none.
    pub fn init(os_type: OsType, auxiliary_base_path: &Path) -> Result<Self> {
        let kind = variant_for(os_type)
        .ok_or_else(|| UnsupportedGuest(format!("{os_type:?}")))?;
        Ok(Self {
                kind,
                os_type,
                aux_floppy_path: auxiliary_base_path.join("aux_floppy.img"),
                aux_iso_path: auxiliary_base_path.join("aux.viso"),
                main_template: None,
                post_template: None,
                created_aux_paths: Vec::new(),
            })
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    /// Path the aux floppy image is (or would be) written to.
    pub fn aux_floppy_path(&self) -> &Path {
        &self.aux_floppy_path
    }

    /// Path the aux VISO descriptor is (or would be) written to.
    pub fn aux_iso_path(&self) -> &Path {
        &self.aux_iso_path
    }

    /// Which media this variant needs wired up for `vm`; the Windows
    /// Vista+ family switches from floppy to VISO under UEFI.
    pub fn media_requirements(&self, vm: &VmContext) -> MediaRequirements {
        match self.kind {
            VariantKind::WindowsSif | VariantKind::Os2 => MediaRequirements {
                floppy: true,
                iso: false,
                iso_is_viso: false,
            },
            VariantKind::WindowsXml => {
                if vm.is_uefi() {
                    MediaRequirements {
                        floppy: false,
                        iso: true,
                        iso_is_viso: true,
                    }
                } else {
                    MediaRequirements {
                        floppy: true,
                        iso: false,
                        iso_is_viso: false,
                    }
                }
            }
            VariantKind::DebianUbuntu | VariantKind::RhelFamily | VariantKind::FreeBsd => {
                MediaRequirements {
                    floppy: false,
                    iso: true,
                    iso_is_viso: true,
                }
            }
        }
    }

    /// Parse the main and post-install script templates -- an override
    /// path if the profile names one, the builtin default otherwise --
    /// and syntax-check both.
    pub fn prepare_unattended_scripts(&mut self, profile: &crate::profile::Profile) -> Result<()> {
        let main_bytes = load_template_bytes(
            profile.script_template_override.as_deref(),
            self.default_main_template(),
        )?;
        let main = TemplateEngine::new(main_bytes)?;
        main.check_syntax()?;

        let post_bytes = load_template_bytes(
            profile.post_script_template_override.as_deref(),
            DEFAULT_POST_SCRIPT,
        )?;
        let post = TemplateEngine::new(post_bytes)?;
        post.check_syntax()?;

        self.main_template = Some(main);
        self.post_template = Some(post);
        Ok(())
    }

    fn default_main_template(&self) -> &'static str {
        match self.kind {
            VariantKind::WindowsSif => DEFAULT_WINDOWS_SIF,
            VariantKind::WindowsXml => DEFAULT_WINDOWS_XML,
            VariantKind::Os2 => DEFAULT_OS2_RESPONSE,
            VariantKind::DebianUbuntu => DEFAULT_DEBIAN_PRESEED,
            VariantKind::RhelFamily => DEFAULT_RHEL_KICKSTART,
            VariantKind::FreeBsd => DEFAULT_FREEBSD_INSTALLERCONFIG,
        }
    }

    /// Build the aux media for this variant. Any failure after the first
    /// file is written rolls back every path created during this call.
    pub fn prepare_media(
        &mut self,
        iso: &mut IsoFs,
        ctx: &TemplateContext,
        overwrite: bool,
    ) -> Result<()> {
        let result = match self.kind {
            VariantKind::WindowsSif => self.build_windows_sif_floppy(ctx, overwrite),
            VariantKind::WindowsXml if !ctx.vm.is_uefi() => {
                self.build_windows_sif_style_xml_floppy(ctx, overwrite)
            }
            VariantKind::WindowsXml => self.build_windows_xml_viso(ctx, overwrite),
            VariantKind::Os2 => self.build_os2_floppy(iso, ctx, overwrite),
            VariantKind::DebianUbuntu => self.build_debian_viso(iso, ctx, overwrite),
            VariantKind::RhelFamily => self.build_rhel_viso(iso, ctx, overwrite),
            VariantKind::FreeBsd => self.build_freebsd_viso(ctx, overwrite),
        };
        if result.is_err() {
            self.rollback();
        }
        result
    }

    fn rollback(&mut self) {
        for path in self.created_aux_paths.drain(..) {
            let _ = fs::remove_file(path);
        }
    }

    fn expand_main(&self, ctx: &TemplateContext) -> Result<Vec<u8>> {
        self.main_template
        .as_ref()
        .expect("prepare_unattended_scripts must run before prepare_media")
        .expand(ctx)
    }

    fn expand_post(&self, ctx: &TemplateContext) -> Result<Vec<u8>> {
        self.post_template
        .as_ref()
        .expect("prepare_unattended_scripts must run before prepare_media")
        .expand(ctx)
    }

    fn write_aux_file(&mut self, path: &Path, data: &[u8], overwrite: bool) -> Result<()> {
        if path.exists() && !overwrite {
            return Err(ParseError::new(format!(
                        "'{}' already exists and overwrite was not requested",
                        path.display()
                    ))
                .into());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
        }
        fs::write(path, data).with_context(|| format!("writing '{}'", path.display()))?;
        self.created_aux_paths.push(path.to_path_buf());
        Ok(())
    }

    fn stage_temp_file(&mut self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self
        .aux_floppy_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
        let path = dir.join(name);
        self.write_aux_file(&path, data, true)?;
        Ok(path)
    }

    fn build_windows_sif_floppy(&mut self, ctx: &TemplateContext, overwrite: bool) -> Result<()> {
        let sif = self.expand_main(ctx)?;
        let mut image = fat12::Fat12Image::new_1_44mb();
        image.add_file("WINNT.SIF", &sif)?;
        let post = self.expand_post(ctx)?;
        image.add_file("VBOXCID.CMD", &post)?;
        let path = self.aux_floppy_path.clone();
        self.write_aux_file(&path, &image.into_bytes(), overwrite)
    }

    /// Windows Vista+ with a BIOS VM still boots from a floppy, carrying
    /// an `AUTOUNATTEND.XML` instead of `WINNT.SIF` (same media, different
    /// payload name).
    fn build_windows_sif_style_xml_floppy(
        &mut self,
        ctx: &TemplateContext,
        overwrite: bool,
    ) -> Result<()> {
        let xml = self.expand_main(ctx)?;
        let mut image = fat12::Fat12Image::new_1_44mb();
        image.add_file("AUTOUNATTEND.XML", &xml)?;
        let post = self.expand_post(ctx)?;
        image.add_file("VBOXCID.CMD", &post)?;
        let path = self.aux_floppy_path.clone();
        self.write_aux_file(&path, &image.into_bytes(), overwrite)
    }

    fn build_windows_xml_viso(&mut self, ctx: &TemplateContext, overwrite: bool) -> Result<()> {
        let xml = self.expand_main(ctx)?;
        let tmp = self.stage_temp_file("AUTOUNATTEND.XML", &xml)?;
        let viso = VisoBuilder::new(Uuid::new_v4())
        .default_modes()
        .import_iso(&ctx.profile.installation_iso)
        .replace("/AUTOUNATTEND.XML", &tmp);
        let path = self.aux_iso_path.clone();
        self.write_aux_file(&path, viso.into_command_line().as_bytes(), overwrite)
    }

    fn build_os2_floppy(
        &mut self,
        iso: &mut IsoFs,
        ctx: &TemplateContext,
        overwrite: bool,
    ) -> Result<()> {
        let tree = ctx
        .detection
        .hints
        .get("OS2SE20.SRC")
        .map(|s| s.trim_start_matches('\\').to_string())
        .unwrap_or_else(|| "OS2IMAGE".to_string());

        let sysinstx_path = format!("{tree}/DISK_0/SYSINSTX.COM");
        let sysinstx = read_iso_bytes(iso, &sysinstx_path)?
        .ok_or_else(|| MissingFile(PathBuf::from(sysinstx_path)))?;

        let mut image = fat12::Fat12Image::new_2_88mb();
        let destination_first_sector = image.boot_sector();
        let lifted = os2_bootsector::lift(&sysinstx, &destination_first_sector)?;
        image.set_boot_sector(&lifted);

        let os2ldr_path = format!("{tree}/DISK_0/OS2LDR");
        let mut os2ldr = read_iso_bytes(iso, &os2ldr_path)?
        .ok_or_else(|| MissingFile(PathBuf::from(os2ldr_path)))?;
        os2_bootsector::patch_os2ldr(&mut os2ldr)?;
        image.add_file("OS2LDR", &os2ldr)?;

        for (slot, candidates) in OS2_VERBATIM_SLOTS {
            if let Some(bytes) = read_iso_bytes_in_disks(iso, &tree, candidates)? {
                image.add_file(slot, &bytes)?;
            }
        }

        let expanded = self.expand_main(ctx)?;
        let expanded =
        String::from_utf8(expanded).context("OS/2 response script is not valid UTF-8")?;
        let aux_dir = self
        .aux_floppy_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
        let produced = splitter::split(&expanded, &aux_dir, overwrite)?;
        for name in &produced {
            let full = aux_dir.join(name);
            let data = fs::read(&full)
            .with_context(|| format!("reading split fragment '{}'", full.display()))?;
            image.add_file(&name.display().to_string(), &data)?;
            self.created_aux_paths.push(full);
        }

        // Tells OS2LDR to honor the second-stage boot menu on resume.
        image.add_file("ALTF2ON.$$$", b"\r\n")?;

        let path = self.aux_floppy_path.clone();
        self.write_aux_file(&path, &image.into_bytes(), overwrite)
    }

    fn build_debian_viso(
        &mut self,
        iso: &mut IsoFs,
        ctx: &TemplateContext,
        overwrite: bool,
    ) -> Result<()> {
        const CANDIDATE_MENUS: &[&str] =
        &["isolinux/txt.cfg", "isolinux/menu.cfg", "isolinux/isolinux.cfg"];
        let (cfg_path, content) = CANDIDATE_MENUS
        .iter()
        .find_map(|p| read_iso_text(iso, p).ok().flatten().map(|c| (*p, c)))
        .ok_or_else(|| {
                ParseError::new("no recognized boot menu config found on the installation ISO")
            })?;

        let preseed = self.expand_main(ctx)?;
        let tmp_preseed = self.stage_temp_file("preseed.cfg", &preseed)?;

        let mut kernel_arg = "auto=true priority=critical url=cdrom:/preseed.cfg".to_string();
        if !ctx.profile.proxy.is_empty() {
            kernel_arg.push_str(&format!(" mirror/http/proxy={}", ctx.profile.proxy));
        }
        if !ctx.profile.extra_install_kernel_parameters.is_empty() {
            kernel_arg.push(' ');
            kernel_arg.push_str(&ctx.profile.extra_install_kernel_parameters);
        }

        let content = rewrite_kernel_args_line(
            &content,
            remove_patterns_for(VariantKind::DebianUbuntu),
            &kernel_arg,
        );
        let content = kargs::rewrite_menu_default(&content)?;
        let tmp_cfg = self.stage_temp_file("boot-menu.cfg", content.as_bytes())?;

        let post = self.expand_post(ctx)?;
        let tmp_post = self.stage_temp_file("postinstall.sh", &post)?;

        let viso = VisoBuilder::new(Uuid::new_v4())
        .default_modes()
        .import_iso(&ctx.profile.installation_iso)
        .replace(&format!("/{cfg_path}"), &tmp_cfg)
        .replace("/preseed.cfg", &tmp_preseed)
        .replace("/postinstall.sh", &tmp_post);
        let path = self.aux_iso_path.clone();
        self.write_aux_file(&path, viso.into_command_line().as_bytes(), overwrite)
    }

    fn build_rhel_viso(
        &mut self,
        iso: &mut IsoFs,
        ctx: &TemplateContext,
        overwrite: bool,
    ) -> Result<()> {
        const CFG_PATH: &str = "isolinux/isolinux.cfg";
        let content = read_iso_text(iso, CFG_PATH)?
        .ok_or_else(|| MissingFile(PathBuf::from(CFG_PATH)))?;

        let ks = self.expand_main(ctx)?;
        let tmp_ks = self.stage_temp_file("ks.cfg", &ks)?;

        let ks_param = if self.os_type == OsType::OracleLinux9 {
            "inst.ks"
        } else {
            "ks"
        };
        let mut kernel_arg = format!("{ks_param}=cdrom:/ks.cfg");
        if !ctx.profile.proxy.is_empty() {
            kernel_arg.push_str(&format!(" proxy={}", ctx.profile.proxy));
        }
        if !ctx.profile.extra_install_kernel_parameters.is_empty() {
            kernel_arg.push(' ');
            kernel_arg.push_str(&ctx.profile.extra_install_kernel_parameters);
        }

        let content = rewrite_kernel_args_line(
            &content,
            remove_patterns_for(VariantKind::RhelFamily),
            &kernel_arg,
        );
        let content = kargs::rewrite_menu_default(&content)?;
        let tmp_cfg = self.stage_temp_file("isolinux.cfg", content.as_bytes())?;

        let post = self.expand_post(ctx)?;
        let tmp_post = self.stage_temp_file("postinstall.sh", &post)?;

        let viso = VisoBuilder::new(Uuid::new_v4())
        .default_modes()
        .import_iso(&ctx.profile.installation_iso)
        .replace(&format!("/{CFG_PATH}"), &tmp_cfg)
        .replace("/ks.cfg", &tmp_ks)
        .replace("/postinstall.sh", &tmp_post);
        let path = self.aux_iso_path.clone();
        self.write_aux_file(&path, viso.into_command_line().as_bytes(), overwrite)
    }

    fn build_freebsd_viso(&mut self, ctx: &TemplateContext, overwrite: bool) -> Result<()> {
        let config = self.expand_main(ctx)?;
        let tmp = self.stage_temp_file("installerconfig", &config)?;
        let viso = VisoBuilder::new(Uuid::new_v4())
        .default_modes()
        .import_iso(&ctx.profile.installation_iso)
        .replace("/etc/installerconfig", &tmp);
        let path = self.aux_iso_path.clone();
        self.write_aux_file(&path, viso.into_command_line().as_bytes(), overwrite)
    }
}

fn load_template_bytes(override_path: Option<&Path>, default: &'static str) -> Result<Vec<u8>> {
    match override_path {
        Some(p) => fs::read(p).with_context(|| format!("reading '{}'", p.display())),
        None => Ok(default.as_bytes().to_vec()),
    }
}

/// Rewrite the parameter tail of the first `append`/`kernel` line found in
/// a syslinux/isolinux/grub menu config using `kargs`'s token-editing
/// rules; text with no such line is returned unchanged.
fn rewrite_kernel_args_line(content: &str, remove_patterns: &[&str], extra: &str) -> String {
    let re = Regex::new(r"(?mi)^(\s*(?:append|kernel)\s+)(.*)$").unwrap();
    if let Some(caps) = re.captures(content) {
        let whole = caps.get(0).unwrap();
        let prefix = &caps[1];
        let params = &caps[2];
        let replacement = format!("{prefix}{}", kargs::edit_line(params, remove_patterns, extra));
        format!(
            "{}{}{}",
            &content[..whole.start()],
            replacement,
            &content[whole.end()..]
        )
    } else {
        content.to_string()
    }
}

fn read_iso_bytes_in_disks(iso: &mut IsoFs, tree: &str, candidates: &[&str]) -> Result<Option<Vec<u8>>> {
    for disk in ["DISK_0", "DISK_1", "DISK_2"] {
        for name in candidates {
            if let Some(bytes) = read_iso_bytes(iso, &format!("{tree}/{disk}/{name}"))? {
                return Ok(Some(bytes));
            }
        }
    }
    Ok(None)
}

fn read_iso_bytes(iso: &mut IsoFs, path: &str) -> Result<Option<Vec<u8>>> {
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

fn read_iso_text(iso: &mut IsoFs, path: &str) -> Result<Option<String>> {
    Ok(read_iso_bytes(iso, path)?.and_then(|b| String::from_utf8(b).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_for_covers_each_family() {
        assert_eq!(variant_for(OsType::WindowsXp), Some(VariantKind::WindowsSif));
        assert_eq!(variant_for(OsType::Windows10), Some(VariantKind::WindowsXml));
        assert_eq!(variant_for(OsType::ArcaOs), Some(VariantKind::Os2));
        assert_eq!(variant_for(OsType::Ubuntu), Some(VariantKind::DebianUbuntu));
        assert_eq!(variant_for(OsType::Fedora), Some(VariantKind::RhelFamily));
        assert_eq!(variant_for(OsType::FreeBsd), Some(VariantKind::FreeBsd));
        assert_eq!(variant_for(OsType::Unknown), None);
        assert_eq!(variant_for(OsType::OpenSuse), None);
    }

    #[test]
    fn windows_xml_switches_to_viso_under_uefi() {
        let variant = InstallerVariant::init(OsType::Windows10, Path::new("/tmp")).unwrap();
        let mut vm = VmContext {
            guest_os_type_id: String::new(),
            is_64_bit: true,
            firmware: crate::vmcontext::Firmware::Bios,
            rtc_uses_utc: true,
            machine_uuid: Uuid::nil(),
            machine_name: String::new(),
        };
        assert_eq!(
            variant.media_requirements(&vm),
            MediaRequirements {
                floppy: true,
                iso: false,
                iso_is_viso: false
            }
        );
        vm.firmware = crate::vmcontext::Firmware::Uefi;
        assert_eq!(
            variant.media_requirements(&vm),
            MediaRequirements {
                floppy: false,
                iso: true,
                iso_is_viso: true
            }
        );
    }

    #[test]
    fn unsupported_os_type_is_an_error() {
        assert!(InstallerVariant::init(OsType::Unknown, Path::new("/tmp")).is_err());
    }

    #[test]
    fn rewrite_kernel_args_line_edits_first_append_line() {
        let cfg = "label install\n append initrd=initrd.img quiet rd.live.check\n";
        let out = rewrite_kernel_args_line(cfg, &["rd.live.check"], "ks=cdrom:/ks.cfg");
        assert!(out.contains("append initrd=initrd.img quiet ks=cdrom:/ks.cfg"));
    }

    #[test]
    fn rewrite_kernel_args_line_leaves_content_without_append_unchanged() {
        let cfg = "label install\n menu label Install\n";
        assert_eq!(rewrite_kernel_args_line(cfg, &[], "x=1"), cfg);
    }

    #[test]
    fn windows_sif_floppy_round_trips_through_fat12() {
        let mut variant = InstallerVariant::init(OsType::WindowsXp, Path::new("/tmp")).unwrap();
        let profile = crate::profile::Profile::default();
        let vm = VmContext {
            guest_os_type_id: String::new(),
            is_64_bit: false,
            firmware: crate::vmcontext::Firmware::Bios,
            rtc_uses_utc: false,
            machine_uuid: Uuid::nil(),
            machine_name: String::new(),
        };
        let detection = crate::detect::DetectionResult::default();
        variant.prepare_unattended_scripts(&profile).unwrap();
        let ctx = TemplateContext {
            profile: &profile,
            vm: &vm,
            detection: &detection,
        };
        let sif = variant.expand_main(&ctx).unwrap();
        let mut image = fat12::Fat12Image::new_1_44mb();
        assert!(image.add_file("WINNT.SIF", &sif).is_ok());
    }
}
