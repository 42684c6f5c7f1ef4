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

//! `ReconfigPlanner`: turns the VM's current storage
//! topology plus the aux-media requirements from an `InstallerVariant`
//! into a concrete list of attachments and a boot order, without
//! actually touching a VM -- that wiring is the caller's job, this module
//! only computes the plan.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::StorageTopology;

/// Bus priority order for sorting and boot precedence: IDE < SATA < SCSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageBus {
    Ide,
    Sata,
    Scsi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    HardDisk,
    Dvd,
    Floppy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// A storage controller as reported by the caller's VM session; the
/// fields `ReconfigPlanner` needs to grow it and sort its slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub bus: StorageBus,
    pub port_count: u32,
    pub max_port_count: u32,
}

/// A currently-attached device, as reported by the caller's VM session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistingAttachment {
    pub controller_name: String,
    pub bus: StorageBus,
    pub device_type: DeviceType,
    pub port: u32,
    pub device: u32,
}

/// A planned attachment in the output list.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAttachment {
    pub bus: StorageBus,
    pub controller_name: String,
    pub device_type: DeviceType,
    pub access_mode: AccessMode,
    pub port: u32,
    pub device: u32,
    pub mount_only: bool,
    pub image_path: Option<PathBuf>,
    pub is_auxiliary: bool,
}

/// A free-or-occupied slot on a controller, used while assigning images
/// to DVD ports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ControllerSlot {
    bus: StorageBus,
    controller_name: String,
    port: u32,
    device: u32,
}

pub struct ReconfigInputs<'a> {
    pub controllers: &'a [Controller],
    pub existing_attachments: &'a [ExistingAttachment],
    pub recommended_dvd_bus: StorageBus,
    pub needs_floppy: bool,
    pub needs_aux_dvd: bool,
    pub needs_original_dvd: bool,
    pub boot_from_aux: bool,
    pub original_iso_path: PathBuf,
    pub aux_image_path: Option<PathBuf>,
}

pub struct ReconfigPlan {
    pub attachments: Vec<PlannedAttachment>,
    pub boot_order: Vec<DeviceType>,
    /// Controllers whose `port_count` needed to grow to fit the plan,
    /// alongside the new count -- the caller applies this before
    /// attaching the devices in `attachments`.
    pub controller_port_count_changes: Vec<(String, u32)>,
}

pub struct ReconfigPlanner;

impl ReconfigPlanner {
    /// Compute the plan for `inputs`, eight steps.
    pub fn plan(inputs: ReconfigInputs) -> Result<ReconfigPlan> {
        let mut attachments = Vec::new();
        let mut port_count_changes = Vec::new();

        // Steps 1-2: floppy controllers. Unmount existing floppy media;
        // confirm port 0/0 is either free or itself a floppy.
        let floppy_controller_name = if inputs.needs_floppy {
            Some(Self::floppy_controller_name(&inputs)?)
        } else {
            None
        };

        for existing in inputs.existing_attachments {
            if existing.device_type == DeviceType::Floppy {
                attachments.push(PlannedAttachment {
                        bus: existing.bus,
                        controller_name: existing.controller_name.clone(),
                        device_type: DeviceType::Floppy,
                        access_mode: AccessMode::ReadWrite,
                        port: existing.port,
                        device: existing.device,
                        mount_only: false,
                        image_path: None,
                        is_auxiliary: false,
                    });
            }
        }

        if let Some(ref name) = floppy_controller_name {
            if !attachments
            .iter()
            .any(|a| a.controller_name == *name && a.port == 0 && a.device == 0)
            {
                attachments.push(PlannedAttachment {
                        bus: StorageBus::Ide,
                        controller_name: name.clone(),
                        device_type: DeviceType::Floppy,
                        access_mode: AccessMode::ReadWrite,
                        port: 0,
                        device: 0,
                        mount_only: false,
                        image_path: inputs.aux_image_path.clone(),
                        is_auxiliary: true,
                    });
            } else if let Some(slot) = attachments
            .iter_mut()
            .find(|a| a.controller_name == *name && a.port == 0 && a.device == 0)
            {
                slot.image_path = inputs.aux_image_path.clone();
                slot.is_auxiliary = true;
            }
        }

        // Step 3: enumerate DVD slots, ejecting existing media.
        let mut dvd_slots: Vec<ControllerSlot> = inputs
        .existing_attachments
        .iter()
        .filter(|a| a.device_type == DeviceType::Dvd)
        .map(|a| ControllerSlot {
                bus: a.bus,
                controller_name: a.controller_name.clone(),
                port: a.port,
                device: a.device,
            })
        .collect();
        for slot in &dvd_slots {
            attachments.push(PlannedAttachment {
                    bus: slot.bus,
                    controller_name: slot.controller_name.clone(),
                    device_type: DeviceType::Dvd,
                    access_mode: AccessMode::ReadOnly,
                    port: slot.port,
                    device: slot.device,
                    mount_only: false,
                    image_path: None,
                    is_auxiliary: false,
                });
        }

        // Step 4: how many DVD images actually need a slot.
        let required = inputs.needs_original_dvd as usize + inputs.needs_aux_dvd as usize;

        // Step 5: grow the recommended controller if there aren't enough
        // slots, failing if it can't grow far enough.
        if dvd_slots.len() < required {
            let controller = inputs
            .controllers
            .iter()
            .find(|c| c.bus == inputs.recommended_dvd_bus)
            .ok_or_else(|| {
                    StorageTopology(format!(
                            "no controller found on the recommended bus {:?}",
                            inputs.recommended_dvd_bus
                        ))
                })?;
            // IDE ports carry a primary/secondary device pair; SATA/SCSI
            // ports carry one device each.
            let per_port = if controller.bus == StorageBus::Ide { 2 } else { 1 };
            let mut port_count = controller.port_count;
            let mut index = dvd_slots.len() as u32;
            while (dvd_slots.len() as u32) < required as u32 {
                let port = index / per_port;
                let device = index % per_port;
                if port >= port_count {
                    port_count = port + 1;
                    if port_count > controller.max_port_count {
                        return Err(StorageTopology(format!(
                                    "controller '{}' has no free DVD slots and cannot grow past its maximum port count ({})",
                                    controller.name, controller.max_port_count
                                ))
                            .into());
                    }
                }
                dvd_slots.push(ControllerSlot {
                        bus: controller.bus,
                        controller_name: controller.name.clone(),
                        port,
                        device,
                    });
                index += 1;
            }
            if port_count != controller.port_count {
                port_count_changes.push((controller.name.clone(), port_count));
            }
        }

        // Step 6: sort by bus/controller/port/device.
        dvd_slots.sort();

        // Step 7: assign images in boot-priority order.
        let mut images: Vec<(PathBuf, bool)> = Vec::new();
        if inputs.boot_from_aux {
            if let Some(aux) = inputs.aux_image_path.clone() {
                if inputs.needs_aux_dvd {
                    images.push((aux, true));
                }
            }
            if inputs.needs_original_dvd {
                images.push((inputs.original_iso_path.clone(), false));
            }
        } else {
            if inputs.needs_original_dvd {
                images.push((inputs.original_iso_path.clone(), false));
            }
            if let Some(aux) = inputs.aux_image_path.clone() {
                if inputs.needs_aux_dvd {
                    images.push((aux, true));
                }
            }
        }

        for (slot, (path, is_aux)) in dvd_slots.iter().zip(images.iter()) {
            attachments.push(PlannedAttachment {
                    bus: slot.bus,
                    controller_name: slot.controller_name.clone(),
                    device_type: DeviceType::Dvd,
                    access_mode: AccessMode::ReadOnly,
                    port: slot.port,
                    device: slot.device,
                    mount_only: false,
                    image_path: Some(path.clone()),
                    is_auxiliary: *is_aux,
                });
        }

        // Step 8: boot order -- HardDisk first, then the aux-boot device
        // type, then the other one.
        let aux_device_type = if inputs.needs_floppy {
            DeviceType::Floppy
        } else {
            DeviceType::Dvd
        };
        let other_device_type = if aux_device_type == DeviceType::Floppy {
            DeviceType::Dvd
        } else {
            DeviceType::Floppy
        };
        let boot_order = if inputs.boot_from_aux {
            vec![DeviceType::HardDisk, aux_device_type, other_device_type]
        } else {
            vec![DeviceType::HardDisk, other_device_type, aux_device_type]
        };

        Ok(ReconfigPlan {
                attachments,
                boot_order,
                controller_port_count_changes: port_count_changes,
            })
    }

    /// Find (or name) the controller a floppy aux image attaches to,
    /// failing if port 0/0 is occupied by something other than a floppy.
    fn floppy_controller_name(inputs: &ReconfigInputs) -> Result<String> {
        for existing in inputs.existing_attachments {
            if existing.port == 0
            && existing.device == 0
            && existing.device_type != DeviceType::Floppy
            {
                return Err(StorageTopology(format!(
                            "controller '{}' port 0 device 0 is occupied by a non-floppy device",
                            existing.controller_name
                        ))
                    .into());
            }
        }
        if let Some(existing_floppy) = inputs
        .existing_attachments
        .iter()
        .find(|a| a.device_type == DeviceType::Floppy)
        {
            return Ok(existing_floppy.controller_name.clone());
        }
        Ok("Floppy".to_string())
    }
}
