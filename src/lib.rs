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

//! `libunattend`: detects the guest OS on an installer ISO, expands its
//! unattended-install scripts from a declarative `Profile`, authors the
//! aux floppy/VISO those scripts are delivered on, and reconfigures a VM's
//! storage controllers and boot order to use them. [`orchestrator`] is the
//! single entry point that sequences the four stages; everything else is
//! the machinery it calls.

pub mod arch;
pub mod detect;
pub mod errors;
pub mod expr;
pub mod installer;
pub mod io;
pub mod iso9660;
pub mod orchestrator;
pub mod profile;
pub mod reconfig;
pub mod template;
pub mod timezone;
pub mod vmcontext;

pub use errors::{
    IncompatibleArch, InvalidField, MissingFile, ParseError, StorageTopology, UnsupportedGuest,
    WrongOrder,
};
pub use orchestrator::Orchestrator;
pub use profile::Profile;
pub use vmcontext::VmContext;
