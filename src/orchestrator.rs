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

//! The Orchestrator: the single entry point sequencing
//! `detect` -> `prepare` -> `constructMedia` -> `reconfigureVM` -> `done`.
//! Calling an operation out of order is a wrong-order error without side
//! effects. Concurrency model: one internal lock serializes
//! every operation except the external VM-mutation step of
//! `reconfigureVM`, which runs with that lock released so the caller is
//! free to take its own VM-session lock without inverting the required
//! VM-session > Orchestrator lock order; a thread-identity guard keeps a
//! second concurrent `reconfigureVM` call from interleaving with the first.

use std::fs::File;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use anyhow::{bail, Result};

use crate::arch::{self, Arch};
use crate::detect::{self, DetectionResult};
use crate::errors::{IncompatibleArch, InvalidField, MissingFile, WrongOrder};
use crate::installer::InstallerVariant;
use crate::iso9660::IsoFs;
use crate::profile::Profile;
use crate::reconfig::{Controller, ExistingAttachment, ReconfigInputs, ReconfigPlan, ReconfigPlanner, StorageBus};
use crate::template::TemplateContext;
use crate::vmcontext::VmContext;

struct State {
    profile: Profile,
    vm: VmContext,
    detection: Option<DetectionResult>,
    variant: Option<InstallerVariant>,
    media_constructed: bool,
}

/// Caller-supplied view of the VM's current storage topology, used to
/// build the [`ReconfigInputs`] that `reconfigureVM` needs on top of
/// what the selected `InstallerVariant` already knows it requires.
pub struct VmStorageState<'a> {
    pub controllers: &'a [Controller],
    pub existing_attachments: &'a [ExistingAttachment],
    pub recommended_dvd_bus: StorageBus,
    pub boot_from_aux: bool,
}

/// Entry point sequencing detection, script preparation, aux-media
/// authoring, and VM reconfiguration for a single install run. Owns the
/// Profile, the detection result, and the selected InstallerVariant for
/// its lifetime.
pub struct Orchestrator {
    state: Mutex<State>,
    reconfigure_guard: Mutex<Option<ThreadId>>,
}

impl Orchestrator {
    pub fn new(profile: Profile, vm: VmContext) -> Self {
        Orchestrator {
            state: Mutex::new(State {
                    profile,
                    vm,
                    detection: None,
                    variant: None,
                    media_constructed: false,
                }),
            reconfigure_guard: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the profile driving this run.
    pub fn profile(&self) -> Profile {
        self.lock().profile.clone()
    }

    /// Detection result, once `detect` (or `prepare`'s auto-detect) has
    /// populated it.
    pub fn detection(&self) -> Option<DetectionResult> {
        self.lock().detection.clone()
    }

    /// Which installer family `prepare` selected, once it has run.
    pub fn variant_kind(&self) -> Option<crate::installer::VariantKind> {
        self.lock().variant.as_ref().map(|v| v.kind())
    }

    /// Run the OS-detection pipeline against `profile.installation_iso`.
    pub fn detect(&self) -> Result<()> {
        let mut state = self.lock();
        Self::run_detect(&mut state)
    }

    fn run_detect(state: &mut State) -> Result<()> {
        if state.profile.installation_iso.as_os_str().is_empty() {
            bail!(InvalidField {
                    field: "installation_iso",
                    reason: "must be set before detect".into(),
                });
        }
        let file = File::open(&state.profile.installation_iso)
        .map_err(|_| MissingFile(state.profile.installation_iso.clone()))?;
        let mut iso = IsoFs::from_file(file)?;
        state.detection = Some(detect::detect_os_from_iso(&mut iso)?);
        Ok(())
    }

    /// Validate the profile, select and initialize the `InstallerVariant`,
    /// parse its templates, and freeze the profile. Auto-runs `detect` if
    /// it hasn't happened yet.
    pub fn prepare(&self) -> Result<()> {
        let mut state = self.lock();
        if state.detection.is_none() {
            Self::run_detect(&mut state)?;
        }
        state.profile.validate()?;

        let detection = state
        .detection
        .clone()
        .expect("detection populated above");

        let image = match state.profile.image_index {
            Some(index) => Some(
                detection
                .images
                .get(index as usize)
                .ok_or_else(|| InvalidField {
                        field: "image_index",
                        reason: format!("index {} is out of range", index),
                    })?,
            ),
            None => detection.images.first(),
        };
        if let Some(image) = image {
            Self::check_arch(&state.vm, image.arch)?;
        }

        let mut variant =
        InstallerVariant::init(detection.os_type, &state.profile.auxiliary_base_path)?;
        variant.prepare_unattended_scripts(&state.profile)?;
        state.variant = Some(variant);
        state.profile.freeze();
        Ok(())
    }

    fn check_arch(vm: &VmContext, iso_arch: Arch) -> Result<()> {
        if arch::is_compatible(vm.is_64_bit, iso_arch) {
            Ok(())
        } else {
            bail!(IncompatibleArch {
                    vm_arch: if vm.is_64_bit {
                        "64-bit".to_string()
                    } else {
                        "32-bit".to_string()
                    },
                    iso_arch: format!("{:?}", iso_arch),
                })
        }
    }

    /// Author the aux floppy/VISO media for the selected variant.
    pub fn construct_media(&self, overwrite: bool) -> Result<()> {
        let mut state = self.lock();
        if state.variant.is_none() {
            bail!(WrongOrder {
                    attempted: "constructMedia",
                    required: "prepare",
                });
        }

        let installation_iso = state.profile.installation_iso.clone();
        let file = File::open(&installation_iso)
        .map_err(|_| MissingFile(installation_iso.clone()))?;
        let mut iso = IsoFs::from_file(file)?;

        let profile = state.profile.clone();
        let vm = state.vm.clone();
        let detection = state
        .detection
        .clone()
        .expect("prepare populated detection");
        let ctx = TemplateContext {
            profile: &profile,
            vm: &vm,
            detection: &detection,
        };

        state
        .variant
        .as_mut()
        .expect("checked above")
        .prepare_media(&mut iso, &ctx, overwrite)?;
        state.media_constructed = true;
        Ok(())
    }

    /// Compute the storage reconfiguration plan and hand it to `apply`,
    /// which performs the actual VM-session mutation. `apply` runs with
    /// the Orchestrator's internal lock released, so it may take the
    /// VM-session lock without inverting the VM-session > Orchestrator
    /// lock order.
    pub fn reconfigure_vm(
        &self,
        storage: VmStorageState,
        apply: impl FnOnce(&ReconfigPlan) -> Result<()>,
    ) -> Result<()> {
        let this_thread = thread::current().id();
        {
            let mut guard = self.reconfigure_guard.lock().unwrap();
            if guard.is_some() {
                bail!(WrongOrder {
                        attempted: "reconfigureVM",
                        required: "previous reconfigureVM to finish",
                    });
            }
            *guard = Some(this_thread);
        }

        let result = self.plan_and_apply(storage, apply);

        *self.reconfigure_guard.lock().unwrap() = None;
        result
    }

    fn plan_and_apply(
        &self,
        storage: VmStorageState,
        apply: impl FnOnce(&ReconfigPlan) -> Result<()>,
    ) -> Result<()> {
        let plan = {
            let state = self.lock();
            if !state.media_constructed {
                bail!(WrongOrder {
                        attempted: "reconfigureVM",
                        required: "constructMedia",
                    });
            }
            let variant = state
            .variant
            .as_ref()
            .expect("media_constructed implies variant is set");
            let requirements = variant.media_requirements(&state.vm);
            let aux_image_path = if requirements.iso {
                Some(variant.aux_iso_path().to_path_buf())
            } else if requirements.floppy {
                Some(variant.aux_floppy_path().to_path_buf())
            } else {
                None
            };
            ReconfigPlanner::plan(ReconfigInputs {
                    controllers: storage.controllers,
                    existing_attachments: storage.existing_attachments,
                    recommended_dvd_bus: storage.recommended_dvd_bus,
                    needs_floppy: requirements.floppy,
                    needs_aux_dvd: requirements.iso,
                    // The original install media stays mounted for this VM's
                    // first boot; a run that reaches reconfigureVM always
                    // needs it.
                    needs_original_dvd: true,
                    boot_from_aux: storage.boot_from_aux,
                    original_iso_path: state.profile.installation_iso.clone(),
                    aux_image_path,
                })?
            // `state` (and its lock) is dropped here, before `apply` runs.
        };
        apply(&plan)
    }

    /// Release the InstallerVariant and reset per-run state. Always
    /// succeeds, regardless of how far the run got.
    pub fn done(&self) -> Result<()> {
        let mut state = self.lock();
        state.variant = None;
        state.detection = None;
        state.media_constructed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::OsType;
    use crate::reconfig::DeviceType;
    use crate::vmcontext::Firmware;
    use std::io::Write;

    fn test_vm() -> VmContext {
        VmContext {
            guest_os_type_id: "Debian_64".into(),
            is_64_bit: true,
            firmware: Firmware::Bios,
            rtc_uses_utc: true,
            machine_uuid: uuid::Uuid::nil(),
            machine_name: "test-vm".into(),
        }
    }

    fn test_profile(iso: &std::path::Path, aux_dir: &std::path::Path) -> Profile {
        Profile {
            installation_iso: iso.to_path_buf(),
            user_login: "user".into(),
            user_password: "hunter2".into(),
            auxiliary_base_path: aux_dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn write_minimal_iso(path: &std::path::Path) {
        // Not a real ISO9660 image; detect() is expected to fail on it,
        // which is exactly what the wrong-order tests below want to
        // avoid exercising. Tests that need detect() to succeed build
        // their own Orchestrator directly against `state` instead.
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(b"not an iso").unwrap();
    }

    #[test]
    fn detect_requires_installation_iso_set() {
        let profile = Profile::default();
        let orchestrator = Orchestrator::new(profile, test_vm());
        let err = orchestrator.detect().unwrap_err();
        assert!(err.downcast_ref::<InvalidField>().is_some());
    }

    #[test]
    fn construct_media_before_prepare_is_wrong_order() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("install.iso");
        write_minimal_iso(&iso_path);
        let profile = test_profile(&iso_path, dir.path());
        let orchestrator = Orchestrator::new(profile, test_vm());
        let err = orchestrator.construct_media(true).unwrap_err();
        assert!(err.downcast_ref::<WrongOrder>().is_some());
    }

    #[test]
    fn reconfigure_vm_before_construct_media_is_wrong_order() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("install.iso");
        write_minimal_iso(&iso_path);
        let profile = test_profile(&iso_path, dir.path());
        let orchestrator = Orchestrator::new(profile, test_vm());
        orchestrator.state.lock().unwrap().variant =
        Some(InstallerVariant::init(OsType::Debian, dir.path()).unwrap());

        let controllers = vec![Controller {
                name: "Sata".into(),
                bus: StorageBus::Sata,
                port_count: 1,
                max_port_count: 4,
            }];
        let existing = Vec::new();
        let storage = VmStorageState {
            controllers: &controllers,
            existing_attachments: &existing,
            recommended_dvd_bus: StorageBus::Sata,
            boot_from_aux: true,
        };
        let err = orchestrator
        .reconfigure_vm(storage, |_plan| Ok(()))
        .unwrap_err();
        assert!(err.downcast_ref::<WrongOrder>().is_some());
    }

    #[test]
    fn done_resets_state_and_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("install.iso");
        write_minimal_iso(&iso_path);
        let profile = test_profile(&iso_path, dir.path());
        let orchestrator = Orchestrator::new(profile, test_vm());
        {
            let mut state = orchestrator.state.lock().unwrap();
            state.variant = Some(InstallerVariant::init(OsType::Debian, dir.path()).unwrap());
            state.media_constructed = true;
        }
        orchestrator.done().unwrap();
        let state = orchestrator.state.lock().unwrap();
        assert!(state.variant.is_none());
        assert!(!state.media_constructed);
        assert!(state.detection.is_none());
    }

    #[test]
    fn reconfigure_vm_guard_rejects_reentrant_call_from_second_thread() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("install.iso");
        write_minimal_iso(&iso_path);
        let profile = test_profile(&iso_path, dir.path());
        let orchestrator = Orchestrator::new(profile, test_vm());
        {
            let mut state = orchestrator.state.lock().unwrap();
            state.variant = Some(InstallerVariant::init(OsType::Debian, dir.path()).unwrap());
        }
        // Hold the guard as if a first call were already in flight.
        *orchestrator.reconfigure_guard.lock().unwrap() = Some(std::thread::current().id());

        let controllers = vec![Controller {
                name: "Sata".into(),
                bus: StorageBus::Sata,
                port_count: 1,
                max_port_count: 4,
            }];
        let existing = Vec::new();
        let storage = VmStorageState {
            controllers: &controllers,
            existing_attachments: &existing,
            recommended_dvd_bus: StorageBus::Sata,
            boot_from_aux: true,
        };
        let err = orchestrator
        .reconfigure_vm(storage, |_plan| Ok(()))
        .unwrap_err();
        assert!(err.downcast_ref::<WrongOrder>().is_some());
    }

    #[test]
    fn reconfigure_vm_runs_apply_with_lock_released() {
        let dir = tempfile::tempdir().unwrap();
        let iso_path = dir.path().join("install.iso");
        write_minimal_iso(&iso_path);
        let profile = test_profile(&iso_path, dir.path());
        let orchestrator = Orchestrator::new(profile, test_vm());
        {
            let mut state = orchestrator.state.lock().unwrap();
            state.variant = Some(InstallerVariant::init(OsType::Debian, dir.path()).unwrap());
            state.media_constructed = true;
        }

        let controllers = vec![Controller {
                name: "Sata".into(),
                bus: StorageBus::Sata,
                port_count: 1,
                max_port_count: 4,
            }];
        let existing = Vec::new();
        let storage = VmStorageState {
            controllers: &controllers,
            existing_attachments: &existing,
            recommended_dvd_bus: StorageBus::Sata,
            boot_from_aux: true,
        };

        orchestrator
        .reconfigure_vm(storage, |plan| {
                // The Orchestrator's own lock must be free here; if it
                // weren't, re-entering any state-reading accessor would
                // deadlock instead of merely racing.
                assert!(orchestrator.state.try_lock().is_ok());
                assert!(!plan.attachments.is_empty());
                assert_eq!(plan.boot_order[0], DeviceType::HardDisk);
                Ok(())
            })
        .unwrap();
    }
}
