use crate::error::{Error, Result};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::trace;

const CHUNK_SIZE: usize = 64 * 1024;

/// Content state of a file at the moment it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    /// Whole seconds since the Unix epoch.
    pub mtime: i64,
    /// Hex-encoded BLAKE3 digest.
    pub content_hash: String,
}

/// Modification time truncated to whole seconds, negative before 1970.
pub fn mtime_secs(metadata: &Metadata) -> io::Result<i64> {
    let modified = metadata.modified()?;
    Ok(match modified.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    })
}

/// Stream the file through BLAKE3 and pair the digest with size and mtime.
pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    let metadata = fs::metadata(path).map_err(|e| Error::file(path, e))?;
    let mtime = mtime_secs(&metadata).map_err(|e| Error::file(path, e))?;

    let mut file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = read_chunk(&mut file, &mut buffer).map_err(|e| Error::file(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        size += n as u64;
    }

    trace!("Fingerprinted {} ({} bytes)", path.display(), size);
    Ok(Fingerprint {
        size,
        mtime,
        content_hash: hasher.finalize().to_hex().to_string(),
    })
}

/// Copy `source` to `dest`, succeeding only if the bytes written match
/// `expected` exactly.
///
/// Data goes to `dest.partial` first and is fsynced before the rename, so
/// `dest` either does not exist or holds a complete, verified copy.
/// Permissions are not carried over.
pub fn copy_verified(source: &Path, dest: &Path, expected: &Fingerprint) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(dest);

    let result = stream_copy(source, &partial);
    let (copied_size, digest) = match result {
        Ok(v) => v,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };

    if copied_size != expected.size || digest != expected.content_hash {
        fs::remove_file(&partial)?;
        return Err(Error::CopyMismatch {
            path: source.to_path_buf(),
            expected_size: expected.size,
            copied_size,
        });
    }

    fs::rename(&partial, dest)?;
    trace!("Copied {} -> {}", source.display(), dest.display());
    Ok(())
}

pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn stream_copy(source: &Path, partial: &Path) -> Result<(u64, String)> {
    let mut input = File::open(source).map_err(|e| Error::file(source, e))?;
    let mut output = File::create(partial)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = read_chunk(&mut input, &mut buffer).map_err(|e| Error::file(source, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        output.write_all(&buffer[..n])?;
        size += n as u64;
    }
    output.sync_all()?;
    Ok((size, hasher.finalize().to_hex().to_string()))
}

fn read_chunk(file: &mut File, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buffer) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
