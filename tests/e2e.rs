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

//! End-to-end scenarios driving the whole Orchestrator lifecycle against
//! a hand-rolled ISO fixture, mirroring the unit-test style used
//! throughout the crate (see `iso9660::tests::build_synthetic_iso`) but
//! exercised here as a `tests/` integration crate.

use std::fs;
use std::path::PathBuf;

use libunattend::detect::OsType;
use libunattend::installer::VariantKind;
use libunattend::orchestrator::VmStorageState;
use libunattend::reconfig::{Controller, DeviceType, ExistingAttachment, StorageBus};
use libunattend::vmcontext::{Firmware, VmContext};
use libunattend::{Orchestrator, Profile};

const SECTOR: usize = 2048;

/// Writes a directory record at `image[offset..]`, returning its length
/// in bytes (33 + name length, padded to an even count).
fn write_dir_record(image: &mut [u8], offset: usize, name: &[u8], lba: u32, length: u32, is_dir: bool) -> usize {
    let base = 33 + name.len();
    let record_len = if base % 2 == 1 { base + 1 } else { base };
    let rec = &mut image[offset..offset + record_len];
    rec[0] = record_len as u8;
    rec[2..6].copy_from_slice(&lba.to_le_bytes());
    rec[10..14].copy_from_slice(&length.to_le_bytes());
    rec[25] = if is_dir { 2 } else { 0 };
    rec[32] = name.len() as u8;
    rec[33..33 + name.len()].copy_from_slice(name);
    record_len
}

/// Builds a minimal, hand-rolled ISO9660 image containing a single
/// nested file, `I386/TXTSETUP.SIF`, whose mere presence is enough for
/// the Windows legacy-install detector to recognize a Windows NT4-era
/// (non-WIM) installer disc.
fn build_windows_nt4_iso() -> Vec<u8> {
    const PVD_SECTOR: usize = 0x10;
    const TERM_SECTOR: usize = 0x11;
    const ROOT_LISTING_SECTOR: usize = 0x12;
    const I386_LISTING_SECTOR: usize = 0x13;
    const CONTENT_SECTOR: usize = 0x14;
    const TOTAL_SECTORS: u32 = 0x15;

    let mut image = vec![0u8; TOTAL_SECTORS as usize * SECTOR];

    let content = b"[SetupData]\r\n";
    let i386_entry_len = {
        let probe_base = 33 + b"TXTSETUP.SIF".len();
        if probe_base % 2 == 1 { probe_base + 1 } else { probe_base }
    } as u32;
    let root_entry_len = {
        let probe_base = 33 + b"I386".len();
        if probe_base % 2 == 1 { probe_base + 1 } else { probe_base }
    } as u32;

    let pvd_off = PVD_SECTOR * SECTOR;
    image[pvd_off] = 1; // volume descriptor type: primary
    image[pvd_off + 1..pvd_off + 6].copy_from_slice(b"CD001");
    image[pvd_off + 6] = 1; // version
    image[pvd_off + 40..pvd_off + 46].copy_from_slice(b"VOLUME");
    image[pvd_off + 80..pvd_off + 84].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
    // root directory record, offset 156, length 34 (name is the implicit "." byte)
    let root_rec_off = pvd_off + 156;
    image[root_rec_off] = 34;
    image[root_rec_off + 2..root_rec_off + 6]
    .copy_from_slice(&(ROOT_LISTING_SECTOR as u32).to_le_bytes());
    image[root_rec_off + 10..root_rec_off + 14].copy_from_slice(&root_entry_len.to_le_bytes());
    image[root_rec_off + 25] = 2; // directory
    image[root_rec_off + 32] = 1; // name length
    image[root_rec_off + 33] = 0; // "." (root, special-cased by the parser)

    let term_off = TERM_SECTOR * SECTOR;
    image[term_off] = 255;
    image[term_off + 1..term_off + 6].copy_from_slice(b"CD001");
    image[term_off + 6] = 1;

    write_dir_record(
        &mut image,
        ROOT_LISTING_SECTOR * SECTOR,
        b"I386",
        I386_LISTING_SECTOR as u32,
        i386_entry_len,
        true,
    );
    write_dir_record(
        &mut image,
        I386_LISTING_SECTOR * SECTOR,
        b"TXTSETUP.SIF",
        CONTENT_SECTOR as u32,
        content.len() as u32,
        false,
    );

    let content_off = CONTENT_SECTOR * SECTOR;
    image[content_off..content_off + content.len()].copy_from_slice(content);

    image
}

fn write_iso_fixture(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("install.iso");
    fs::write(&path, build_windows_nt4_iso()).unwrap();
    path
}

fn test_vm(firmware: Firmware) -> VmContext {
    VmContext {
        guest_os_type_id: "WindowsNT4_32".into(),
        is_64_bit: false,
        firmware,
        rtc_uses_utc: false,
        machine_uuid: uuid::Uuid::nil(),
        machine_name: "e2e-test-vm".into(),
    }
}

fn test_profile(iso: PathBuf, aux_dir: PathBuf) -> Profile {
    Profile {
        installation_iso: iso,
        user_login: "Administrator".into(),
        user_password: "hunter2".into(),
        auxiliary_base_path: aux_dir,
        ..Default::default()
    }
}

/// Full happy-path lifecycle: detect the NT4-era ISO, prepare the SIF
/// variant, author its aux floppy, and compute a reconfiguration plan
/// that boots from it.
#[test]
fn full_lifecycle_authors_sif_floppy_and_reconfigures() {
    let dir = tempfile::tempdir().unwrap();
    let iso_path = write_iso_fixture(dir.path());
    let aux_dir = dir.path().join("aux");
    let profile = test_profile(iso_path.clone(), aux_dir.clone());
    let orchestrator = Orchestrator::new(profile, test_vm(Firmware::Bios));

    orchestrator.detect().expect("detect should succeed");
    let detection = orchestrator.detection().unwrap();
    assert_eq!(detection.os_type, OsType::WindowsNt4);

    orchestrator.prepare().expect("prepare should succeed");
    assert_eq!(orchestrator.variant_kind(), Some(VariantKind::WindowsSif));

    orchestrator
    .construct_media(false)
    .expect("constructMedia should succeed");
    let floppy_path = aux_dir.join("aux_floppy.img");
    let floppy_bytes = fs::metadata(&floppy_path).expect("aux floppy should exist");
    assert_eq!(floppy_bytes.len(), 2880 * 512);

    let controllers = vec![Controller {
            name: "Sata".into(),
            bus: StorageBus::Sata,
            port_count: 1,
            max_port_count: 2,
        }];
    let existing: Vec<ExistingAttachment> = Vec::new();
    let storage = VmStorageState {
        controllers: &controllers,
        existing_attachments: &existing,
        recommended_dvd_bus: StorageBus::Sata,
        boot_from_aux: true,
    };
    orchestrator
    .reconfigure_vm(storage, |plan| {
            assert_eq!(
                plan.boot_order,
                vec![DeviceType::HardDisk, DeviceType::Floppy, DeviceType::Dvd]
            );
            let floppy = plan
            .attachments
            .iter()
            .find(|a| a.device_type == DeviceType::Floppy && a.is_auxiliary)
            .expect("plan should attach the aux floppy");
            assert_eq!(floppy.image_path.as_deref(), Some(floppy_path.as_path()));
            let dvd = plan
            .attachments
            .iter()
            .find(|a| a.device_type == DeviceType::Dvd)
            .expect("plan should attach the original install DVD");
            assert_eq!(dvd.image_path.as_deref(), Some(iso_path.as_path()));
            Ok(())
        })
    .expect("reconfigureVM should succeed");

    orchestrator.done().unwrap();
    assert!(orchestrator.detection().is_none());
    assert_eq!(orchestrator.variant_kind(), None);
}

/// Ordering is strict: every operation out of sequence fails with a
/// wrong-order error and no side effects.
#[test]
fn out_of_order_calls_fail_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let iso_path = write_iso_fixture(dir.path());
    let aux_dir = dir.path().join("aux");
    let profile = test_profile(iso_path, aux_dir.clone());
    let orchestrator = Orchestrator::new(profile, test_vm(Firmware::Bios));

    let err = orchestrator.construct_media(false).unwrap_err();
    assert!(err
        .downcast_ref::<libunattend::WrongOrder>()
        .is_some());
    assert!(!aux_dir.exists());

    let controllers: Vec<Controller> = Vec::new();
    let existing: Vec<ExistingAttachment> = Vec::new();
    let storage = VmStorageState {
        controllers: &controllers,
        existing_attachments: &existing,
        recommended_dvd_bus: StorageBus::Sata,
        boot_from_aux: true,
    };
    let err = orchestrator
    .reconfigure_vm(storage, |_plan| Ok(()))
    .unwrap_err();
    assert!(err.downcast_ref::<libunattend::WrongOrder>().is_some());
}

/// An invalid profile (no password set) fails `prepare` with an
/// invalid-field error, even though detection on the same ISO succeeds.
#[test]
fn prepare_rejects_invalid_profile() {
    let dir = tempfile::tempdir().unwrap();
    let iso_path = write_iso_fixture(dir.path());
    let aux_dir = dir.path().join("aux");
    let profile = Profile {
        installation_iso: iso_path,
        user_login: "Administrator".into(),
        // user_password left empty: invalid.
        auxiliary_base_path: aux_dir,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(profile, test_vm(Firmware::Bios));
    let err = orchestrator.prepare().unwrap_err();
    assert!(err.downcast_ref::<libunattend::InvalidField>().is_some());
}

/// Windows Vista+ guests under UEFI firmware switch from a floppy to a
/// VISO; this is exercised directly against
/// `InstallerVariant` since the fixture above only detects an NT4-era
/// guest, and media_requirements is a pure function of OsType + firmware.
#[test]
fn windows_xml_variant_prefers_viso_under_uefi() {
    use libunattend::installer::InstallerVariant;
    let dir = tempfile::tempdir().unwrap();
    let variant = InstallerVariant::init(OsType::Windows10, dir.path()).unwrap();
    assert_eq!(variant.kind(), VariantKind::WindowsXml);

    let bios_reqs = variant.media_requirements(&test_vm(Firmware::Bios));
    assert!(bios_reqs.floppy && !bios_reqs.iso);

    let uefi_reqs = variant.media_requirements(&test_vm(Firmware::Uefi));
    assert!(!uefi_reqs.floppy && uefi_reqs.iso && uefi_reqs.iso_is_viso);
}
