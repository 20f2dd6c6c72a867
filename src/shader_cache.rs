//! A persistent cache of linked program binaries.
//!
//! Programs are identified by the SHA-256 digest of their shaders' source
//! text, concatenated in attachment order. The cache is two files next to
//! each other: `<name>.blob` holds the binaries back to back, and
//! `<name>.idx` holds a header followed by fixed-size `IndexEntry` records
//! saying where each digest's binary lives in the blob. Appends write the
//! blob bytes before the index entry, so an interrupted run never leaves an
//! entry pointing past the end of the blob.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest as _, Sha256};

use crate::error::{Result, RetraceError};
use crate::raw::{self, Simple};

const MAGIC: u32 = u32::from_le_bytes(*b"GLSC");
const VERSION: u32 = 1;

pub type Digest = [u64; 4];

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
struct IndexHeader {
    magic: u32,
    version: u32,
}

unsafe impl Simple for IndexHeader {}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(C)]
struct IndexEntry {
    digest: Digest,
    offset: u64,
    len: u64,
    format: u32,
    padding: u32,
}

unsafe impl Simple for IndexEntry {}

/// A program binary and the driver format it is in.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramBinary {
    pub format: u32,
    pub data: Vec<u8>,
}

/// Digest a program's shader sources, in attachment order.
pub fn digest<'a, I>(sources: I) -> Digest
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for source in sources {
        hasher.update(source.as_bytes());
    }
    let bytes = hasher.finalize();
    let mut digest = [0u64; 4];
    for (word, chunk) in digest.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *word = u64::from_le_bytes(buf);
    }
    digest
}

pub struct ShaderCache {
    index: File,
    blob: File,
    entries: HashMap<Digest, IndexEntry>,
    blob_len: u64,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
}

impl ShaderCache {
    /// Open the cache at `path`, creating it if it doesn't exist.
    ///
    /// A cache written by a different version is an error when `strict` is
    /// set; otherwise it is thrown away and started afresh.
    pub fn open<P: AsRef<Path>>(path: P, strict: bool) -> Result<ShaderCache> {
        let path = path.as_ref();
        let index_path = with_suffix(path, ".idx");
        let mut index = open_rw(&index_path)?;
        let mut blob = open_rw(&with_suffix(path, ".blob"))?;

        let index_len = index.metadata()?.len() as usize;
        let mut entries = HashMap::new();
        let mut fresh = index_len == 0;
        if !fresh {
            let header = if index_len >= mem::size_of::<IndexHeader>() {
                raw::read_value::<IndexHeader, _>(&mut index)?
            } else {
                IndexHeader::default()
            };
            if header.magic != MAGIC || header.version != VERSION {
                let msg = format!(
                    "{} has version {}, but this retracer writes version {}",
                    index_path.display(),
                    header.version,
                    VERSION
                );
                if strict {
                    return Err(RetraceError::ShaderCache(msg));
                }
                warn!("{}; recreating the shader cache", msg);
                fresh = true;
            } else {
                let body = index_len - mem::size_of::<IndexHeader>();
                // Drop a torn trailing entry rather than failing.
                let whole = body - body % mem::size_of::<IndexEntry>();
                let list: Vec<IndexEntry> = raw::read_vec(&mut index, whole, "shader cache index")?;
                entries.extend(list.into_iter().map(|entry| (entry.digest, entry)));
            }
        }

        if fresh {
            index.set_len(0)?;
            blob.set_len(0)?;
            index.seek(SeekFrom::Start(0))?;
            index.write_all(raw::as_bytes(&IndexHeader {
                magic: MAGIC,
                version: VERSION,
            }))?;
            index.flush()?;
        }

        let blob_len = blob.metadata()?.len();
        entries.retain(|_, entry| entry.offset + entry.len <= blob_len);
        info!(
            "shader cache {} has {} programs",
            path.display(),
            entries.len()
        );
        Ok(ShaderCache {
            index,
            blob,
            entries,
            blob_len,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn lookup(&mut self, digest: &Digest) -> Result<Option<ProgramBinary>> {
        let entry = match self.entries.get(digest) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        let mut data = vec![0; entry.len as usize];
        self.blob.seek(SeekFrom::Start(entry.offset))?;
        self.blob.read_exact(&mut data)?;
        Ok(Some(ProgramBinary {
            format: entry.format,
            data,
        }))
    }

    /// Store `binary` under `digest`. A digest already present is left alone.
    pub fn append(&mut self, digest: Digest, binary: &ProgramBinary) -> Result<()> {
        if self.entries.contains_key(&digest) {
            return Ok(());
        }
        let entry = IndexEntry {
            digest,
            offset: self.blob_len,
            len: binary.data.len() as u64,
            format: binary.format,
            padding: 0,
        };
        self.blob.seek(SeekFrom::End(0))?;
        self.blob.write_all(&binary.data)?;
        self.blob.flush()?;
        self.index.seek(SeekFrom::End(0))?;
        self.index.write_all(raw::as_bytes(&entry))?;
        self.index.flush()?;

        self.blob_len += entry.len;
        self.entries.insert(digest, entry);
        debug!("cached a {}-byte program binary", entry.len);
        Ok(())
    }
}

#[test]
fn test_digest() {
    // Only the concatenation matters.
    assert_eq!(digest(vec!["ab", "c"]), digest(vec!["a", "bc"]));
    assert_ne!(digest(vec!["abc"]), digest(vec!["abd"]));
}

#[test]
fn test_shader_cache_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("programs");
    let vs = "attribute vec4 p; void main() { gl_Position = p; }";
    let fs = "void main() { gl_FragColor = vec4(1.0); }";
    let key = digest(vec![vs, fs]);
    let binary = ProgramBinary {
        format: 0x8741,
        data: vec![1, 2, 3, 4, 5],
    };

    {
        let mut cache = ShaderCache::open(&path, true).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&key).unwrap(), None);
        cache.append(key, &binary).unwrap();
        cache
            .append(digest(vec![fs]), &ProgramBinary { format: 1, data: vec![9] })
            .unwrap();
        assert_eq!(cache.lookup(&key).unwrap().as_ref(), Some(&binary));
    }

    let mut cache = ShaderCache::open(&path, true).unwrap();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.lookup(&key).unwrap(), Some(binary));
    assert_eq!(cache.lookup(&digest(vec![fs])).unwrap().unwrap().data, vec![9]);
}

#[test]
fn test_shader_cache_version_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old");
    let stale = IndexHeader {
        magic: MAGIC,
        version: VERSION + 1,
    };
    std::fs::write(with_suffix(&path, ".idx"), raw::as_bytes(&stale)).unwrap();
    std::fs::write(with_suffix(&path, ".blob"), b"junk").unwrap();

    assert!(matches!(
        ShaderCache::open(&path, true),
        Err(RetraceError::ShaderCache(_))
    ));

    let cache = ShaderCache::open(&path, false).unwrap();
    assert!(cache.is_empty());
    assert_eq!(std::fs::metadata(with_suffix(&path, ".blob")).unwrap().len(), 0);
}
