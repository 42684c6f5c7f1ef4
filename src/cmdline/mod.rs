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

//! Command-line entry points, one subcommand per public Orchestrator
//! operation plus a `run` convenience that drives the whole pipeline.
//! Since there is no real hypervisor object model in this crate, the VM context and its current storage topology are
//! supplied to `reconfigure`/`run` as a serialized [`VmFixture`] file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use libunattend::profile::Profile;
use libunattend::reconfig::{Controller, ExistingAttachment, StorageBus};
use libunattend::vmcontext::VmContext;
use libunattend::Orchestrator;

// Args are listed in --help in the order declared in these structs/enums.
// Please keep the entire help text to 80 columns.

#[derive(Debug, Parser)]
#[clap(version)]
#[clap(args_conflicts_with_subcommands = true)]
#[clap(disable_help_subcommand = true)]
#[clap(help_expected = true)]
pub enum Cmd {
    /// Detect the guest OS on an installer ISO
    Detect(DetectConfig),
    /// Validate a profile and select an installer variant
    Prepare(PrepareConfig),
    /// Author the aux floppy/VISO for a profile
    ConstructMedia(ConstructMediaConfig),
    /// Compute and apply a storage reconfiguration plan
    Reconfigure(ReconfigureConfig),
    /// Run the full detect/prepare/construct-media/reconfigure pipeline
    Run(RunConfig),
}

#[derive(Debug, Parser)]
pub struct DetectConfig {
    /// Installer ISO to inspect
    #[clap(long, value_name = "PATH")]
    pub iso: PathBuf,
}

#[derive(Debug, Parser)]
pub struct PrepareConfig {
    /// Profile file (TOML or JSON, selected by extension)
    #[clap(long, value_name = "PATH")]
    pub profile: PathBuf,
}

#[derive(Debug, Parser)]
pub struct ConstructMediaConfig {
    /// Profile file (TOML or JSON, selected by extension)
    #[clap(long, value_name = "PATH")]
    pub profile: PathBuf,
    /// Overwrite aux media files that already exist
    #[clap(long)]
    pub overwrite: bool,
}

#[derive(Debug, Parser)]
pub struct ReconfigureConfig {
    /// Profile file (TOML or JSON, selected by extension)
    #[clap(long, value_name = "PATH")]
    pub profile: PathBuf,
    /// VM context and storage topology fixture (TOML or JSON)
    #[clap(long, value_name = "PATH")]
    pub vm_context: PathBuf,
    /// Overwrite aux media files that already exist
    #[clap(long)]
    pub overwrite: bool,
}

#[derive(Debug, Parser)]
pub struct RunConfig {
    /// Profile file (TOML or JSON, selected by extension)
    #[clap(long, value_name = "PATH")]
    pub profile: PathBuf,
    /// VM context and storage topology fixture (TOML or JSON)
    #[clap(long, value_name = "PATH")]
    pub vm_context: PathBuf,
    /// Overwrite aux media files that already exist
    #[clap(long)]
    pub overwrite: bool,
}

/// The VM context plus its current storage topology, as a caller-supplied
/// snapshot standing in for a real hypervisor session/machine object
/// graph, which this crate doesn't depend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmFixture {
    pub vm: VmContext,
    pub controllers: Vec<Controller>,
    pub existing_attachments: Vec<ExistingAttachment>,
    pub recommended_dvd_bus: StorageBus,
    pub boot_from_aux: bool,
}

impl VmFixture {
    fn load(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading '{}'", path.display()))?;
        let fixture = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&data)?,
            _ => toml::from_str(&data)?,
        };
        Ok(fixture)
    }
}

pub fn parse_args() -> Cmd {
    Cmd::parse()
}

pub fn run(cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Detect(c) => detect(&c),
        Cmd::Prepare(c) => prepare(&c),
        Cmd::ConstructMedia(c) => construct_media(&c),
        Cmd::Reconfigure(c) => reconfigure(&c),
        Cmd::Run(c) => run_all(&c),
    }
}

fn detect(config: &DetectConfig) -> Result<()> {
    let result = libunattend::detect::detect_os(&config.iso)
    .with_context(|| format!("detecting OS on '{}'", config.iso.display()))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn prepare(config: &PrepareConfig) -> Result<()> {
    let profile = Profile::load(&config.profile)?;
    let vm = VmContext::default();
    let orchestrator = Orchestrator::new(profile, vm);
    orchestrator.prepare().context("preparing profile")?;
    let detection = orchestrator.detection().expect("prepare populates detection");
    let kind = orchestrator.variant_kind().expect("prepare selects a variant");
    eprintln!("detected guest OS: {:?}", detection.os_type);
    eprintln!("selected installer variant: {:?}", kind);
    Ok(())
}

fn construct_media(config: &ConstructMediaConfig) -> Result<()> {
    let profile = Profile::load(&config.profile)?;
    let vm = VmContext::default();
    let orchestrator = Orchestrator::new(profile, vm);
    orchestrator.prepare().context("preparing profile")?;
    orchestrator
    .construct_media(config.overwrite)
    .context("authoring aux media")?;
    eprintln!("aux media authored");
    orchestrator.done()?;
    Ok(())
}

fn reconfigure(config: &ReconfigureConfig) -> Result<()> {
    let profile = Profile::load(&config.profile)?;
    let fixture = VmFixture::load(&config.vm_context)?;
    let orchestrator = Orchestrator::new(profile, fixture.vm);
    orchestrator.prepare().context("preparing profile")?;
    orchestrator
    .construct_media(config.overwrite)
    .context("authoring aux media")?;
    apply_reconfigure(&orchestrator, &fixture)?;
    orchestrator.done()?;
    Ok(())
}

fn run_all(config: &RunConfig) -> Result<()> {
    let profile = Profile::load(&config.profile)?;
    let fixture = VmFixture::load(&config.vm_context)?;
    let orchestrator = Orchestrator::new(profile, fixture.vm.clone());
    orchestrator.detect().context("detecting guest OS")?;
    orchestrator.prepare().context("preparing profile")?;
    orchestrator
    .construct_media(config.overwrite)
    .context("authoring aux media")?;
    apply_reconfigure(&orchestrator, &fixture)?;
    orchestrator.done()?;
    eprintln!("done");
    Ok(())
}

fn apply_reconfigure(orchestrator: &Orchestrator, fixture: &VmFixture) -> Result<()> {
    use libunattend::orchestrator::VmStorageState;
    let storage = VmStorageState {
        controllers: &fixture.controllers,
        existing_attachments: &fixture.existing_attachments,
        recommended_dvd_bus: fixture.recommended_dvd_bus,
        boot_from_aux: fixture.boot_from_aux,
    };
    orchestrator
    .reconfigure_vm(storage, |plan| {
            eprintln!(
                "reconfigure plan: {} attachment(s), boot order {:?}",
                plan.attachments.len(),
                plan.boot_order
            );
            for (name, new_count) in &plan.controller_port_count_changes {
                eprintln!("  grow controller '{}' to {} port(s)", name, new_count);
            }
            Ok(())
        })
    .context("computing storage reconfiguration plan")
}
