//! Synchronous sector transfers against the medium under test.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => f.write_str("write"),
            Direction::Read => f.write_str("read"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{direction} error: {source}")]
    Io {
        direction: Direction,
        #[source]
        source: io::Error,
    },
    #[error("buffer holds {have} bytes, transfer needs {need}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("sectors [{start},{end}[ lie beyond the medium ({capacity} sectors)")]
    OutOfRange { start: u64, end: u64, capacity: u64 },
    #[error("{direction} error {code:#x}")]
    Code { direction: Direction, code: i64 },
}

pub trait BlockTransport {
    /// Transfer `sector_count` sectors starting at `start_sector`. On
    /// `Write` the first `sector_count * sector_size` bytes of `buf` are the
    /// source, on `Read` they are the destination.
    fn transfer(
        &mut self,
        direction: Direction,
        buf: &mut [u8],
        sector_count: u64,
        start_sector: u64,
    ) -> Result<(), TransportError>;
}

impl<T: BlockTransport + ?Sized> BlockTransport for &mut T {
    fn transfer(
        &mut self,
        direction: Direction,
        buf: &mut [u8],
        sector_count: u64,
        start_sector: u64,
    ) -> Result<(), TransportError> {
        (**self).transfer(direction, buf, sector_count, start_sector)
    }
}

fn transfer_len(buf: &[u8], sector_size: u32, sector_count: u64) -> Result<usize, TransportError> {
    let need = (sector_count * u64::from(sector_size)) as usize;
    if buf.len() < need {
        return Err(TransportError::BufferTooSmall { need, have: buf.len() });
    }
    Ok(need)
}

fn open_options(direct_io: bool) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    if direct_io {
        #[cfg(target_os = "linux")]
        {
            opts.custom_flags(libc::O_DIRECT);
        }
    }
    opts
}

/// Positioned I/O on a device node or image file.
#[derive(Debug)]
pub struct FileTransport {
    file: File,
    path: PathBuf,
    sector_size: u32,
    direct_io: bool,
}

impl FileTransport {
    /// Direct I/O is only honoured on Linux; elsewhere it is ignored and the
    /// cache is flushed after every write instead.
    pub fn open<P: AsRef<Path>>(path: P, sector_size: u32, direct_io: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_options(direct_io).open(&path)?;
        Ok(Self {
            file,
            path,
            sector_size,
            direct_io: direct_io && cfg!(target_os = "linux"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_direct(&self) -> bool {
        self.direct_io
    }

    fn offset(&self, sector: u64) -> u64 {
        sector * u64::from(self.sector_size)
    }

    /// Push written data to the medium so the following read cannot be
    /// served from the page cache.
    fn flush_range(&mut self, offset: u64, len: usize) -> io::Result<()> {
        if self.direct_io {
            return Ok(());
        }
        self.file.sync_data()?;
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe {
                libc::posix_fadvise(
                    self.file.as_raw_fd(),
                    offset as libc::off_t,
                    len as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                )
            };
            if ret != 0 {
                return Err(io::Error::from_raw_os_error(ret));
            }
        }
        #[cfg(not(target_os = "linux"))]
        let _ = (offset, len);
        Ok(())
    }
}

impl BlockTransport for FileTransport {
    fn transfer(
        &mut self,
        direction: Direction,
        buf: &mut [u8],
        sector_count: u64,
        start_sector: u64,
    ) -> Result<(), TransportError> {
        let len = transfer_len(buf, self.sector_size, sector_count)?;
        let offset = self.offset(start_sector);
        let io_err = |source| TransportError::Io { direction, source };
        self.file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        match direction {
            Direction::Write => {
                self.file.write_all(&buf[..len]).map_err(io_err)?;
                self.flush_range(offset, len).map_err(io_err)
            }
            Direction::Read => self.file.read_exact(&mut buf[..len]).map_err(io_err),
        }
    }
}

/// In-memory medium.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    data: Vec<u8>,
    sector_size: u32,
}

impl MemoryTransport {
    pub fn new(sector_size: u32, sectors: u64) -> Self {
        Self {
            data: vec![0u8; (sectors * u64::from(sector_size)) as usize],
            sector_size,
        }
    }

    pub fn sectors(&self) -> u64 {
        self.data.len() as u64 / u64::from(self.sector_size)
    }

    pub fn sector(&self, index: u64) -> &[u8] {
        let ss = self.sector_size as usize;
        let start = index as usize * ss;
        &self.data[start..start + ss]
    }
}

impl BlockTransport for MemoryTransport {
    fn transfer(
        &mut self,
        direction: Direction,
        buf: &mut [u8],
        sector_count: u64,
        start_sector: u64,
    ) -> Result<(), TransportError> {
        let len = transfer_len(buf, self.sector_size, sector_count)?;
        let end = start_sector + sector_count;
        if end > self.sectors() {
            return Err(TransportError::OutOfRange {
                start: start_sector,
                end,
                capacity: self.sectors(),
            });
        }
        let offset = (start_sector * u64::from(self.sector_size)) as usize;
        let medium = &mut self.data[offset..offset + len];
        match direction {
            Direction::Write => medium.copy_from_slice(&buf[..len]),
            Direction::Read => buf[..len].copy_from_slice(medium),
        }
        Ok(())
    }
}
