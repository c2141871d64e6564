use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A helper trait for things that implement both `Read` and `Seek`
pub trait SeekableRead: Seek + Read {}
impl<T> SeekableRead for T where T: Seek + Read {}

/// A byte source that can hand out additional, independent views of the
/// same bytes.
///
/// Each view carries its own cursor, and a reader built on one gets its own
/// scratch buffers, so reopening is how one file is shared across threads:
/// the readers are independent even though the bytes are not.
pub trait Reopen: Sized {
    fn reopen(&self) -> io::Result<Self>;
}

/// A file handle that remembers the path it came from, so more handles can
/// be opened against the same path.
pub struct ReopenableFile {
    path: PathBuf,
    file: File,
}

impl ReopenableFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<ReopenableFile> {
        let path = path.into();
        let file = File::open(&path)?;
        Ok(ReopenableFile { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reopen for ReopenableFile {
    fn reopen(&self) -> io::Result<Self> {
        ReopenableFile::open(&*self.path)
    }
}

impl Seek for ReopenableFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Read for ReopenableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}
