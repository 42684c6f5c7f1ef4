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

//! VISO (virtual ISO) descriptor builder: an argv-style
//! argument vector, always opening with a random file-marker UUID,
//! consumed by an ISO-maker backend that lazily assembles an ISO9660
//! image from an imported source ISO plus file overrides.

use std::path::Path;

use uuid::Uuid;

use crate::template::escape::{self, Escape};

pub struct VisoBuilder {
    args: Vec<String>,
}

impl VisoBuilder {
    /// Start a new descriptor. The file-marker UUID is the backend's
    /// delimiter between global options and per-file directives; it must
    /// come first.
    pub fn new(file_marker: Uuid) -> Self {
        Self {
            args: vec![file_marker.to_string()],
        }
    }

    pub fn default_modes(mut self) -> Self {
        self.args.push("--file-mode=0444".to_string());
        self.args.push("--dir-mode=0555".to_string());
        self
    }

    pub fn import_iso(mut self, path: &Path) -> Self {
        self.args.push("--import-iso".to_string());
        self.args.push(path.display().to_string());
        self
    }

    /// Replace the content of `viso_path` (a path inside the resulting
    /// ISO) with the local file at `local_path`.
    pub fn replace(mut self, viso_path: &str, local_path: &Path) -> Self {
        self.args
        .push(format!("{viso_path}={}", local_path.display()));
        self
    }

    /// Remove a path from the imported ISO's tree.
    pub fn remove(mut self, viso_path: &str) -> Self {
        self.args.push(format!("--remove={viso_path}"));
        self
    }

    /// Push a nested source ISO to be mounted under `mount_point` (e.g.
    /// `/vboxadditions`, `/vboxvalidationkit`); `pop()` closes the block.
    pub fn push_iso(mut self, path: &Path, mount_point: &str) -> Self {
        self.args.push("--push-iso".to_string());
        self.args.push(path.display().to_string());
        self.args.push(mount_point.to_string());
        self
    }

    pub fn pop(mut self) -> Self {
        self.args.push("--pop".to_string());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Render as a single shell-quoted command line.
    pub fn into_command_line(self) -> String {
        self.args
        .iter()
        .map(|a| escape::apply(a, Escape::Shell))
        .collect::<Vec<_>>()
        .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builder_opens_with_file_marker_and_carries_modes() {
        let marker = Uuid::nil();
        let viso = VisoBuilder::new(marker)
        .default_modes()
        .import_iso(&PathBuf::from("/tmp/src.iso"));
        assert_eq!(viso.args()[0], marker.to_string());
        assert!(viso.args().contains(&"--file-mode=0444".to_string()));
        assert!(viso.args().contains(&"--import-iso".to_string()));
    }

    #[test]
    fn push_iso_and_pop_bracket_a_mount() {
        let viso = VisoBuilder::new(Uuid::nil())
        .push_iso(&PathBuf::from("/tmp/additions.iso"), "/vboxadditions")
        .pop();
        assert_eq!(viso.args()[1], "--push-iso");
        assert_eq!(viso.args().last().unwrap(), "--pop");
    }

    #[test]
    fn command_line_shell_quotes_every_argument() {
        let line = VisoBuilder::new(Uuid::nil())
        .replace("/isolinux/isolinux.cfg", &PathBuf::from("/tmp/a b.cfg"))
        .into_command_line();
        assert!(line.contains("'/isolinux/isolinux.cfg=/tmp/a b.cfg'"));
    }
}
