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

//! A narrow facade over the VM object model. The real hypervisor's
//! Machine/Session object graph is an external collaborator; callers
//! hand us a frozen snapshot of just the fields the installer engine
//! needs to read.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Firmware {
    Bios,
    Uefi,
}

impl Default for Firmware {
    fn default() -> Self {
        Firmware::Bios
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmContext {
    pub guest_os_type_id: String,
    pub is_64_bit: bool,
    pub firmware: Firmware,
    pub rtc_uses_utc: bool,
    pub machine_uuid: Uuid,
    pub machine_name: String,
}

impl VmContext {
    pub fn is_uefi(&self) -> bool {
        self.firmware == Firmware::Uefi
    }
}
