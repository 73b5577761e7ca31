//! Shared verdict slot: a 1 MiB mmap-backed file with a single writer (the
//! sandbox) and a single reader (the frontend).
//!
//! The split into writer/reader halves enforces the single-writer,
//! single-reader rule by construction; the socket request/ack handshake
//! serializes access to the slot. The reader maps the file afresh on every
//! read so a restarted sandbox that recreates the file cannot leave a stale
//! mapping behind.

use crate::verdict::VerdictRecord;
use anyhow::{bail, Context, Result};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;

pub const SLOT_SIZE: usize = 1024 * 1024;

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path contains NUL byte: {}", path.display()))
}

fn errno_context(what: &str) -> anyhow::Error {
    anyhow::anyhow!("{what}: {}", io::Error::last_os_error())
}

/// Writer half, held open by the sandbox for its whole lifetime.
pub struct VerdictWriter {
    fd: libc::c_int,
    ptr: *mut u8,
    path: PathBuf,
}

// The raw mapping pointer is only ever touched by the owning sandbox thread.
unsafe impl Send for VerdictWriter {}

impl VerdictWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let cpath = path_cstring(path)?;
        // SAFETY: cpath is a valid NUL-terminated string; open/ftruncate/mmap
        // are called with matching fd ownership and the map is SLOT_SIZE long.
        unsafe {
            let fd = libc::open(
                cpath.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
                0o644,
            );
            if fd < 0 {
                return Err(errno_context("creating verdict slot file"));
            }
            if libc::ftruncate(fd, SLOT_SIZE as libc::off_t) < 0 {
                let err = errno_context("sizing verdict slot file");
                libc::close(fd);
                return Err(err);
            }
            let ptr = libc::mmap(
                ptr::null_mut(),
                SLOT_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if ptr == libc::MAP_FAILED {
                let err = errno_context("mapping verdict slot");
                libc::close(fd);
                return Err(err);
            }
            let mut writer = Self {
                fd,
                ptr: ptr.cast(),
                path: path.to_path_buf(),
            };
            writer.publish(&VerdictRecord::default())?;
            Ok(writer)
        }
    }

    /// Write one record into the slot, zeroing the remainder.
    pub fn publish(&mut self, record: &VerdictRecord) -> Result<()> {
        let bytes = record.clone().fit_within(SLOT_SIZE).encode();
        if bytes.len() > SLOT_SIZE {
            bail!("verdict record exceeds slot even after clamping");
        }
        // SAFETY: self.ptr is a live SLOT_SIZE mapping owned by this writer,
        // and bytes.len() <= SLOT_SIZE.
        unsafe {
            ptr::write_bytes(self.ptr, 0, SLOT_SIZE);
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr, bytes.len());
        }
        Ok(())
    }
}

impl Drop for VerdictWriter {
    fn drop(&mut self) {
        // SAFETY: ptr/fd were produced by mmap/open in create and are
        // released exactly once here.
        unsafe {
            libc::munmap(self.ptr.cast(), SLOT_SIZE);
            libc::close(self.fd);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Reader half, held by the frontend.
pub struct VerdictReader {
    path: PathBuf,
}

impl VerdictReader {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn read(&self) -> Result<VerdictRecord> {
        let cpath = path_cstring(&self.path)?;
        // SAFETY: the mapping is read-only, SLOT_SIZE long, and unmapped
        // before returning; the copied Vec owns its bytes independently.
        let bytes = unsafe {
            let fd = libc::open(cpath.as_ptr(), libc::O_RDONLY);
            if fd < 0 {
                return Err(errno_context("opening verdict slot file"));
            }
            let ptr = libc::mmap(
                ptr::null_mut(),
                SLOT_SIZE,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                0,
            );
            if ptr == libc::MAP_FAILED {
                let err = errno_context("mapping verdict slot read-only");
                libc::close(fd);
                return Err(err);
            }
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), SLOT_SIZE).to_vec();
            libc::munmap(ptr, SLOT_SIZE);
            libc::close(fd);
            bytes
        };
        VerdictRecord::decode(&bytes).context("decoding shared verdict record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_slot_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after epoch")
            .as_nanos();
        env::temp_dir().join(format!("awesh-slot-{tag}-{nanos}.mmap"))
    }

    #[test]
    fn writer_then_reader_round_trips_binary_payloads() {
        let path = unique_slot_path("roundtrip");
        let mut writer = VerdictWriter::create(&path).expect("create writer");
        let record = VerdictRecord::new(
            -113,
            b"stdout with\nnewlines and \0 nuls".to_vec(),
            b"stderr side".to_vec(),
        );
        writer.publish(&record).expect("publish");

        let reader = VerdictReader::open(&path);
        assert_eq!(reader.read().expect("read"), record);
    }

    #[test]
    fn publish_overwrites_the_previous_record_completely() {
        let path = unique_slot_path("overwrite");
        let mut writer = VerdictWriter::create(&path).expect("create writer");
        writer
            .publish(&VerdictRecord::new(0, vec![b'x'; 4096], Vec::new()))
            .expect("first publish");
        let second = VerdictRecord::new(1, b"short".to_vec(), Vec::new());
        writer.publish(&second).expect("second publish");

        assert_eq!(VerdictReader::open(&path).read().expect("read"), second);
    }

    #[test]
    fn oversized_payloads_are_clamped_not_rejected() {
        let path = unique_slot_path("clamp");
        let mut writer = VerdictWriter::create(&path).expect("create writer");
        let record = VerdictRecord::new(0, vec![b'a'; SLOT_SIZE * 2], Vec::new());
        writer.publish(&record).expect("publish clamped");
        let read = VerdictReader::open(&path).read().expect("read");
        assert!(read.stdout.len() < SLOT_SIZE);
        assert!(read.stdout.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn reader_fails_cleanly_when_the_slot_is_missing() {
        let reader = VerdictReader::open(&unique_slot_path("missing"));
        assert!(reader.read().is_err());
    }

    #[test]
    fn dropping_the_writer_removes_the_slot_file() {
        let path = unique_slot_path("drop");
        let writer = VerdictWriter::create(&path).expect("create writer");
        assert!(path.exists());
        drop(writer);
        assert!(!path.exists());
    }
}
