use std::io::{Seek, SeekFrom};

/// Reports the current byte position of a seekable stream.
pub trait Tell {
    fn tell(&mut self) -> std::io::Result<u64>;
}

impl<S: Seek> Tell for S {
    fn tell(&mut self) -> std::io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }
}
