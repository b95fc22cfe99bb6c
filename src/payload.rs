//! The immutable selection payload, fixed at startup.

use std::{
    ffi::OsString,
    fs::File,
    io::Read,
    ops::Deref,
    os::unix::ffi::OsStringExt,
    path::Path,
    ptr::{self, NonNull},
    slice,
};

use log::warn;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use crate::{CliError, IoErr};

/// What the process serves for the lifetime of its CLIPBOARD ownership.
/// All converters read through [`Payload::bytes`]; nothing mutates it.
pub enum Payload {
    /// The literal argument bytes.
    Literal(Vec<u8>),
    /// The canonicalized path bytes, to be advertised with file targets.
    FileName(Vec<u8>),
    /// The bytes of a file.
    Contents(Contents),
}

pub enum Contents {
    Buffered(Vec<u8>),
    Mapped(Mmap),
}

impl Payload {
    pub fn literal(arg: OsString) -> Self {
        Self::Literal(arg.into_vec())
    }

    pub fn file_name(path: &Path) -> Result<Self, CliError> {
        let resolved = path
            .canonicalize()
            .map_io_err(|| format!("Failed to resolve path: {path:?}"))?;
        Ok(Self::FileName(resolved.into_os_string().into_vec()))
    }

    /// Reads the file into memory when it fits in one page, and maps it
    /// read-only and private otherwise.
    pub fn contents(path: &Path) -> Result<Self, CliError> {
        let mut file =
            File::open(path).map_io_err(|| format!("Failed to open file: {path:?}"))?;
        let len = file
            .metadata()
            .map_io_err(|| format!("Failed to stat file: {path:?}"))?
            .len();
        let len = usize::try_from(len).map_io_err(|| format!("File too large: {path:?}"))?;

        let contents = if len <= rustix::param::page_size() {
            let mut buf = Vec::with_capacity(len);
            file.read_to_end(&mut buf)
                .map_io_err(|| format!("Failed to read file: {path:?}"))?;
            Contents::Buffered(buf)
        } else {
            Contents::Mapped(
                Mmap::new(&file, len).map_io_err(|| format!("Failed to mmap file: {path:?}"))?,
            )
        };
        Ok(Self::Contents(contents))
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Literal(bytes) | Self::FileName(bytes) => bytes,
            Self::Contents(Contents::Buffered(bytes)) => bytes,
            Self::Contents(Contents::Mapped(map)) => map,
        }
    }

    /// Whether the payload names a filesystem path, enabling file targets.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::FileName(_))
    }
}

pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mmap {
    fn new(file: &File, len: usize) -> rustix::io::Result<Self> {
        Ok(Self {
            ptr: unsafe {
                NonNull::new_unchecked(mmap(
                    ptr::null_mut(),
                    len,
                    ProtFlags::READ,
                    MapFlags::PRIVATE,
                    file,
                    0,
                )?)
            }
            .cast(),
            len,
        })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!("Failed to unmap payload: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use super::*;

    fn scratch_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = env::temp_dir().join(format!("clipcast-{name}-{}", process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn literal_keeps_raw_bytes() {
        let payload = Payload::literal(OsString::from("hello"));
        assert_eq!(payload.bytes(), b"hello");
        assert!(!payload.is_file());
    }

    #[test]
    fn file_name_is_canonical() {
        let path = scratch_file("canon", b"");
        let payload = Payload::file_name(&path).unwrap();
        assert!(payload.is_file());
        assert_eq!(payload.bytes()[0], b'/');
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(Payload::file_name(Path::new("/nonexistent/clipcast")).is_err());
        assert!(Payload::contents(Path::new("/nonexistent/clipcast")).is_err());
    }

    #[test]
    fn small_contents_are_buffered() {
        let path = scratch_file("small", b"abc");
        let payload = Payload::contents(&path).unwrap();
        assert_eq!(payload.bytes(), b"abc");
        assert!(!payload.is_file());
        assert!(matches!(
            payload,
            Payload::Contents(Contents::Buffered(_))
        ));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn large_contents_are_mapped() {
        let data = vec![0x5A; rustix::param::page_size() + 1];
        let path = scratch_file("large", &data);
        let payload = Payload::contents(&path).unwrap();
        assert_eq!(payload.bytes(), &*data);
        assert!(matches!(payload, Payload::Contents(Contents::Mapped(_))));
        fs::remove_file(path).unwrap();
    }
}
