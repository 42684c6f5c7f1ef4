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

//! Minimal FAT12 image writer for the two floppy geometries the aux
//! floppy layouts call for: 1.44 MB "HD" for Windows SIF,
//! 2.88 MB "ED" for OS/2. Flat root directory only, contiguous cluster
//! allocation, single FAT copy mirrored into both FAT slots -- enough to
//! hold the small curated file sets those layouts need, not a
//! general-purpose filesystem writer.

use anyhow::{ensure, Result};

const SECTOR_SIZE: usize = 512;
const NUM_FATS: usize = 2;
const MEDIA_DESCRIPTOR: u8 = 0xF0;

#[derive(Debug, Clone, Copy)]
struct Geometry {
    sectors_per_cluster: usize,
    reserved_sectors: usize,
    root_entries: usize,
    total_sectors: usize,
    sectors_per_fat: usize,
    sectors_per_track: u16,
    heads: u16,
}

const HD_1_44MB: Geometry = Geometry {
    sectors_per_cluster: 1,
    reserved_sectors: 1,
    root_entries: 224,
    total_sectors: 2880,
    sectors_per_fat: 9,
    sectors_per_track: 18,
    heads: 2,
};

const ED_2_88MB: Geometry = Geometry {
    sectors_per_cluster: 2,
    reserved_sectors: 1,
    root_entries: 240,
    total_sectors: 5760,
    sectors_per_fat: 9,
    sectors_per_track: 36,
    heads: 2,
};

impl Geometry {
    fn root_dir_sectors(&self) -> usize {
        (self.root_entries * 32) / SECTOR_SIZE
    }

    fn data_start_sector(&self) -> usize {
        self.reserved_sectors + NUM_FATS * self.sectors_per_fat + self.root_dir_sectors()
    }

    fn max_clusters(&self) -> usize {
        (self.total_sectors - self.data_start_sector()) / self.sectors_per_cluster + 2
    }
}

pub struct Fat12Image {
    geometry: Geometry,
    sectors: Vec<[u8; SECTOR_SIZE]>,
    fat: Vec<u16>,
    root: Vec<DirEntry>,
    next_free_cluster: usize,
}

struct DirEntry {
    name: [u8; 8],
    ext: [u8; 3],
    first_cluster: u16,
    size: u32,
}

impl Fat12Image {
    /// 1.44 MB "HD" geometry, used for the Windows SIF aux floppy.
    pub fn new_1_44mb() -> Self {
        Self::with_geometry(HD_1_44MB)
    }

    /// 2.88 MB "ED" geometry, used for the OS/2 aux floppy.
    pub fn new_2_88mb() -> Self {
        Self::with_geometry(ED_2_88MB)
    }

    fn with_geometry(geometry: Geometry) -> Self {
        let mut img = Self {
            geometry,
            sectors: vec![[0u8; SECTOR_SIZE]; geometry.total_sectors],
            fat: vec![0u16; 2], // clusters 0,1 are reserved
            root: Vec::new(),
            next_free_cluster: 2,
        };
        img.write_default_boot_sector();
        img
    }

    /// Overwrite sector 0 with a caller-supplied 512-byte boot sector,
    /// e.g. the one lifted and patched by [`super::os2_bootsector`].
    pub fn set_boot_sector(&mut self, boot: &[u8; SECTOR_SIZE]) {
        self.sectors[0] = *boot;
    }

    /// The current boot sector, e.g. to hand to
    /// [`super::os2_bootsector::lift`] as the destination geometry source
    /// before replacing it with the lifted one.
    pub fn boot_sector(&self) -> [u8; SECTOR_SIZE] {
        self.sectors[0]
    }

    fn write_default_boot_sector(&mut self) {
        let g = self.geometry;
        let mut b = [0u8; SECTOR_SIZE];
        b[0] = 0xEB;
        b[1] = 0x3C;
        b[2] = 0x90;
        b[3..11].copy_from_slice(b"VBOXUNAT");
        b[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        b[13] = g.sectors_per_cluster as u8;
        b[14..16].copy_from_slice(&(g.reserved_sectors as u16).to_le_bytes());
        b[16] = NUM_FATS as u8;
        b[17..19].copy_from_slice(&(g.root_entries as u16).to_le_bytes());
        b[19..21].copy_from_slice(&(g.total_sectors as u16).to_le_bytes());
        b[21] = MEDIA_DESCRIPTOR;
        b[22..24].copy_from_slice(&(g.sectors_per_fat as u16).to_le_bytes());
        b[24..26].copy_from_slice(&g.sectors_per_track.to_le_bytes());
        b[26..28].copy_from_slice(&g.heads.to_le_bytes());
        b[510] = 0x55;
        b[511] = 0xAA;
        self.sectors[0] = b;
    }

    /// Add a file to the root directory with an 8.3 name, allocating
    /// contiguous clusters for its content.
    pub fn add_file(&mut self, name_8_3: &str, data: &[u8]) -> Result<()> {
        ensure!(
            self.root.len() < self.geometry.root_entries,
            "root directory is full"
        );
        let (name, ext) = split_8_3(name_8_3)?;

        let cluster_bytes = self.geometry.sectors_per_cluster * SECTOR_SIZE;
        let clusters_needed = data.len().div_ceil(cluster_bytes).max(1);
        let first_cluster = self.next_free_cluster;
        ensure!(
            first_cluster + clusters_needed <= self.geometry.max_clusters(),
            "floppy image out of space for '{}'",
            name_8_3
        );

        let data_start_sector = self.geometry.data_start_sector();
        for i in 0..clusters_needed {
            let cluster = first_cluster + i;
            let chunk_start = i * cluster_bytes;
            let chunk_end = (chunk_start + cluster_bytes).min(data.len());
            let chunk = &data[chunk_start..chunk_end];

            let sector = data_start_sector + (cluster - 2) * self.geometry.sectors_per_cluster;
            for (s, part) in chunk.chunks(SECTOR_SIZE).enumerate() {
                self.sectors[sector + s][..part.len()].copy_from_slice(part);
            }

            while self.fat.len() <= cluster {
                self.fat.push(0);
            }
            self.fat[cluster] = if i + 1 == clusters_needed {
                0xFFF // end of chain
            } else {
                (cluster + 1) as u16
            };
        }
        self.next_free_cluster = first_cluster + clusters_needed;

        self.root.push(DirEntry {
                name,
                ext,
                first_cluster: first_cluster as u16,
                size: data.len() as u32,
            });
        Ok(())
    }

    /// Serialize the full image, writing the FAT tables and root
    /// directory over the reserved/directory sectors computed at
    /// construction time.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.write_fat();
        self.write_root_dir();
        let mut out = Vec::with_capacity(self.geometry.total_sectors * SECTOR_SIZE);
        for sector in &self.sectors {
            out.extend_from_slice(sector);
        }
        out
    }

    fn write_fat(&mut self) {
        let fat_bytes = pack_fat12(&self.fat);
        for copy in 0..NUM_FATS {
            let start_sector = self.geometry.reserved_sectors + copy * self.geometry.sectors_per_fat;
            for (i, chunk) in fat_bytes.chunks(SECTOR_SIZE).enumerate() {
                if i >= self.geometry.sectors_per_fat {
                    break;
                }
                self.sectors[start_sector + i][..chunk.len()].copy_from_slice(chunk);
            }
        }
    }

    fn write_root_dir(&mut self) {
        let g = self.geometry;
        let root_start_sector = g.reserved_sectors + NUM_FATS * g.sectors_per_fat;
        let mut buf = vec![0u8; g.root_dir_sectors() * SECTOR_SIZE];
        for (i, entry) in self.root.iter().enumerate() {
            let off = i * 32;
            buf[off..off + 8].copy_from_slice(&entry.name);
            buf[off + 8..off + 11].copy_from_slice(&entry.ext);
            buf[off + 11] = 0x20; // ATTR_ARCHIVE
            buf[off + 26..off + 28].copy_from_slice(&entry.first_cluster.to_le_bytes());
            buf[off + 28..off + 32].copy_from_slice(&entry.size.to_le_bytes());
        }
        for (i, chunk) in buf.chunks(SECTOR_SIZE).enumerate() {
            self.sectors[root_start_sector + i].copy_from_slice(chunk);
        }
    }
}

fn split_8_3(name: &str) -> Result<([u8; 8], [u8; 3])> {
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    ensure!(
        stem.len() <= 8 && ext.len() <= 3,
        "'{}' is not a valid 8.3 name",
        name
    );
    let mut name_buf = [b' '; 8];
    let mut ext_buf = [b' '; 3];
    name_buf[..stem.len()].copy_from_slice(stem.to_ascii_uppercase().as_bytes());
    ext_buf[..ext.len()].copy_from_slice(ext.to_ascii_uppercase().as_bytes());
    Ok((name_buf, ext_buf))
}

/// Pack 12-bit cluster values two-to-three-bytes, little-endian-nibble
/// order, per the FAT12 on-disk encoding.
fn pack_fat12(fat: &[u16]) -> Vec<u8> {
    let mut out = vec![0u8; (fat.len() * 3).div_ceil(2) + 3];
    out[0] = MEDIA_DESCRIPTOR;
    out[1] = 0xFF;
    out[2] = 0xFF;
    for (i, &value) in fat.iter().enumerate() {
        let byte_index = 3 + (i * 3) / 2;
        if i % 2 == 0 {
            out[byte_index] = (value & 0xFF) as u8;
            out[byte_index + 1] = (out[byte_index + 1] & 0xF0) | ((value >> 8) & 0x0F) as u8;
        } else {
            out[byte_index] = (out[byte_index] & 0x0F) | (((value & 0x0F) << 4) as u8);
            out[byte_index + 1] = (value >> 4) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_size_matches_1_44mb_geometry() {
        let img = Fat12Image::new_1_44mb();
        let bytes = img.into_bytes();
        assert_eq!(bytes.len(), HD_1_44MB.total_sectors * SECTOR_SIZE);
    }

    #[test]
    fn image_size_matches_2_88mb_geometry() {
        let img = Fat12Image::new_2_88mb();
        let bytes = img.into_bytes();
        assert_eq!(bytes.len(), ED_2_88MB.total_sectors * SECTOR_SIZE);
    }

    #[test]
    fn boot_sector_carries_signature() {
        let img = Fat12Image::new_2_88mb();
        let bytes = img.into_bytes();
        assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
    }

    #[test]
    fn added_file_round_trips_through_root_directory() {
        let mut img = Fat12Image::new_1_44mb();
        img.add_file("CONFIG.SYS", b"some config content").unwrap();
        let bytes = img.into_bytes();
        let root_off = (HD_1_44MB.reserved_sectors + NUM_FATS * HD_1_44MB.sectors_per_fat) * SECTOR_SIZE;
        assert_eq!(&bytes[root_off..root_off + 8], b"CONFIG ");
        assert_eq!(&bytes[root_off + 8..root_off + 11], b"SYS");
    }

    #[test]
    fn rejects_name_longer_than_8_3() {
        let mut img = Fat12Image::new_1_44mb();
        assert!(img.add_file("WAYTOOLONGNAME.TXT", b"x").is_err());
    }

    #[test]
    fn os2_floppy_holds_more_data_than_windows_floppy() {
        let img = Fat12Image::new_2_88mb();
        assert!(ED_2_88MB.max_clusters() > HD_1_44MB.max_clusters());
        drop(img.into_bytes());
    }
}
