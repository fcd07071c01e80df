//! Reader for the directory tree of Valve VPK packages (versions 1 and 2).
//!
//! Only the tree is loaded at open time. File bodies are read on demand,
//! either from the data section that follows the tree (single-file addons,
//! archive index `0x7FFF`) or from the numbered `_NNN.vpk` chunks next to a
//! `_dir.vpk`.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};

const VPK_SIGNATURE: u32 = 0x55AA_1234;
const V1_HEADER_LEN: u64 = 12;
const V2_HEADER_LEN: u64 = 28;
const EMBEDDED_ARCHIVE_INDEX: u16 = 0x7FFF;
const ENTRY_TERMINATOR: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpkEntry {
    pub path: String,
    pub crc: u32,
    pub preload: Vec<u8>,
    pub archive_index: u16,
    pub offset: u32,
    pub length: u32,
}

impl VpkEntry {
    pub fn size(&self) -> u64 {
        self.preload.len() as u64 + self.length as u64
    }
}

#[derive(Debug)]
pub struct VpkArchive {
    path: PathBuf,
    version: u32,
    data_offset: u64,
    entries: Vec<VpkEntry>,
}

impl VpkArchive {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; V1_HEADER_LEN as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| anyhow!("truncated VPK header"))?;

        let signature = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if signature != VPK_SIGNATURE {
            bail!("not a VPK file (signature {:#010x})", signature);
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let tree_size = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as u64;

        let header_len = match version {
            1 => V1_HEADER_LEN,
            2 => {
                let mut rest = [0u8; (V2_HEADER_LEN - V1_HEADER_LEN) as usize];
                reader
                    .read_exact(&mut rest)
                    .map_err(|_| anyhow!("truncated VPK v2 header"))?;
                V2_HEADER_LEN
            }
            other => bail!("unsupported VPK version {}", other),
        };

        if header_len + tree_size > file_len {
            bail!(
                "VPK tree of {} bytes exceeds file size {}",
                tree_size,
                file_len
            );
        }

        let mut tree = vec![0u8; tree_size as usize];
        reader.read_exact(&mut tree)?;
        let entries = parse_tree(&tree)?;

        Ok(Self {
            path: path.to_path_buf(),
            version,
            data_offset: header_len + tree_size,
            entries,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[VpkEntry] {
        &self.entries
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Finds an entry by path, ignoring case and separator style.
    pub fn find(&self, internal_path: &str) -> Option<&VpkEntry> {
        let wanted = internal_path.replace('\\', "/");
        let wanted = wanted.trim_start_matches('/');
        self.entries
            .iter()
            .find(|e| e.path.eq_ignore_ascii_case(wanted))
    }

    pub fn read(&self, internal_path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.find(internal_path) {
            Some(entry) => self.read_entry(entry).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_entry(&self, entry: &VpkEntry) -> anyhow::Result<Vec<u8>> {
        if entry.length == 0 {
            return Ok(entry.preload.clone());
        }

        let (source, offset) = if entry.archive_index == EMBEDDED_ARCHIVE_INDEX {
            (self.path.clone(), self.data_offset + entry.offset as u64)
        } else {
            (self.chunk_path(entry.archive_index)?, entry.offset as u64)
        };

        let mut file =
            File::open(&source).with_context(|| format!("open {}", source.display()))?;
        let source_len = file.metadata()?.len();
        let end = offset + entry.length as u64;
        if end > source_len {
            bail!(
                "entry {} spans bytes {}..{} but {} holds {}",
                entry.path,
                offset,
                end,
                source.display(),
                source_len
            );
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        data.extend_from_slice(&entry.preload);
        file.seek(SeekFrom::Start(offset))?;
        let start = data.len();
        data.resize(start + entry.length as usize, 0);
        file.read_exact(&mut data[start..])
            .with_context(|| format!("read {} from {}", entry.path, source.display()))?;
        Ok(data)
    }

    fn chunk_path(&self, index: u16) -> anyhow::Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let lower = name.to_ascii_lowercase();
        let stem = lower
            .strip_suffix("_dir.vpk")
            .map(|_| &name[..name.len() - "_dir.vpk".len()])
            .ok_or_else(|| anyhow!("entry stored in archive {} but {} is not a _dir.vpk", index, name))?;
        Ok(self.path.with_file_name(format!("{}_{:03}.vpk", stem, index)))
    }
}

struct TreeCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TreeCursor<'a> {
    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| anyhow!("VPK tree truncated at byte {}", self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u16(&mut self) -> anyhow::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> anyhow::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_cstr(&mut self) -> anyhow::Result<String> {
        let rest = &self.buf[self.pos..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| anyhow!("unterminated string in VPK tree at byte {}", self.pos))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }
}

fn parse_tree(buf: &[u8]) -> anyhow::Result<Vec<VpkEntry>> {
    let mut cursor = TreeCursor { buf, pos: 0 };
    let mut entries = Vec::new();

    loop {
        let ext = cursor.read_cstr()?;
        if ext.is_empty() {
            break;
        }
        loop {
            let dir = cursor.read_cstr()?;
            if dir.is_empty() {
                break;
            }
            loop {
                let name = cursor.read_cstr()?;
                if name.is_empty() {
                    break;
                }
                let crc = cursor.read_u32()?;
                let preload_len = cursor.read_u16()?;
                let archive_index = cursor.read_u16()?;
                let offset = cursor.read_u32()?;
                let length = cursor.read_u32()?;
                let terminator = cursor.read_u16()?;
                if terminator != ENTRY_TERMINATOR {
                    bail!("bad entry terminator {:#06x} for {}", terminator, name);
                }
                let preload = cursor.take(preload_len as usize)?.to_vec();
                entries.push(VpkEntry {
                    path: join_entry_path(&dir, &name, &ext),
                    crc,
                    preload,
                    archive_index,
                    offset,
                    length,
                });
            }
        }
    }

    Ok(entries)
}

// A single space stands for "no directory" / "no extension".
fn join_entry_path(dir: &str, name: &str, ext: &str) -> String {
    let mut path = String::with_capacity(dir.len() + name.len() + ext.len() + 2);
    let dir = dir.trim();
    if !dir.is_empty() {
        path.push_str(dir);
        path.push('/');
    }
    path.push_str(name);
    let ext = ext.trim();
    if !ext.is_empty() {
        path.push('.');
        path.push_str(ext);
    }
    path
}

/// Boundary between the services and the archive format. Calls are blocking;
/// async callers run them on `spawn_blocking`.
pub trait ArchiveReader: Send + Sync + 'static {
    /// Every internal path of the archive, as stored.
    fn list_paths(&self, archive: &Path) -> anyhow::Result<Vec<String>>;

    /// Contents of one internal file, `None` when the archive has no such entry.
    fn read_entry(&self, archive: &Path, internal_path: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VpkReader;

impl ArchiveReader for VpkReader {
    fn list_paths(&self, archive: &Path) -> anyhow::Result<Vec<String>> {
        Ok(VpkArchive::open(archive)?.paths())
    }

    fn read_entry(&self, archive: &Path, internal_path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        VpkArchive::open(archive)?.read(internal_path)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;
    use std::path::Path;

    use super::{EMBEDDED_ARCHIVE_INDEX, ENTRY_TERMINATOR, VPK_SIGNATURE};

    fn split(path: &str) -> (String, String, String) {
        let (dir, file) = match path.rfind('/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => (" ", path),
        };
        let (name, ext) = match file.rfind('.') {
            Some(i) => (&file[..i], &file[i + 1..]),
            None => (file, " "),
        };
        (dir.to_string(), name.to_string(), ext.to_string())
    }

    /// Builds a VPK. With `archive_index == None` bodies are embedded after
    /// the tree; otherwise they are returned separately as chunk bytes.
    pub(crate) fn build(
        version: u32,
        files: &[(&str, &[u8])],
        archive_index: Option<u16>,
    ) -> (Vec<u8>, Vec<u8>) {
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<(String, Vec<u8>)>>> =
            BTreeMap::new();
        for (path, data) in files {
            let (dir, name, ext) = split(path);
            grouped
                .entry(ext)
                .or_default()
                .entry(dir)
                .or_default()
                .push((name, data.to_vec()));
        }

        let index = archive_index.unwrap_or(EMBEDDED_ARCHIVE_INDEX);
        let mut tree = Vec::new();
        let mut data = Vec::new();
        for (ext, dirs) in &grouped {
            tree.extend_from_slice(ext.as_bytes());
            tree.push(0);
            for (dir, names) in dirs {
                tree.extend_from_slice(dir.as_bytes());
                tree.push(0);
                for (name, body) in names {
                    tree.extend_from_slice(name.as_bytes());
                    tree.push(0);
                    tree.extend_from_slice(&0u32.to_le_bytes());
                    tree.extend_from_slice(&0u16.to_le_bytes());
                    tree.extend_from_slice(&index.to_le_bytes());
                    tree.extend_from_slice(&(data.len() as u32).to_le_bytes());
                    tree.extend_from_slice(&(body.len() as u32).to_le_bytes());
                    tree.extend_from_slice(&ENTRY_TERMINATOR.to_le_bytes());
                    data.extend_from_slice(body);
                }
                tree.push(0);
            }
            tree.push(0);
        }
        tree.push(0);

        let mut out = Vec::new();
        out.extend_from_slice(&VPK_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        if version == 2 {
            let embedded_len = if archive_index.is_none() { data.len() } else { 0 };
            out.extend_from_slice(&(embedded_len as u32).to_le_bytes());
            out.extend_from_slice(&[0u8; 12]);
        }
        out.extend_from_slice(&tree);
        if archive_index.is_none() {
            out.extend_from_slice(&data);
            (out, Vec::new())
        } else {
            (out, data)
        }
    }

    pub(crate) fn write(path: &Path, files: &[(&str, &[u8])]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let (bytes, _) = build(1, files, None);
        std::fs::write(path, bytes).unwrap();
    }

    pub(crate) fn write_paths(path: &Path, paths: &[&str]) {
        let files: Vec<(&str, &[u8])> = paths.iter().map(|p| (*p, b"x".as_slice())).collect();
        write(path, &files);
    }
}
