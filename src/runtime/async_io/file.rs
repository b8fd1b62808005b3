//! File handles for the staged file operations
//!
//! Regular files are always "ready" to epoll, so file work is not driven by
//! readiness; the runtime runs each stage as a deferred job instead.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

/// File state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// File is open and ready
    Open,
    /// File is closed
    Closed,
}

/// Open flags for async files
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    create: bool,
    truncate: bool,
    mode: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            truncate: false,
            mode: 0o644,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Permission bits used when the file is created
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    fn to_std(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate)
            .mode(self.mode);
        options
    }
}

/// Async file wrapper
pub struct AsyncFile {
    file: Option<File>,
    state: FileState,
    position: u64,
}

impl AsyncFile {
    /// Open a file with the given options
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> io::Result<Self> {
        let file = options.to_std().open(path)?;
        Ok(Self {
            file: Some(file),
            state: FileState::Open,
            position: 0,
        })
    }

    /// Open a file for writing, creating it with mode 0644 and truncating it
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open(
            path,
            OpenOptions::new()
                .read(false)
                .write(true)
                .create(true)
                .truncate(true),
        )
    }

    /// Open a file for reading
    pub fn open_read<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open(path, OpenOptions::new().read(true))
    }

    fn handle(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file is closed"))
    }

    /// Read the remaining contents of the file
    pub fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut contents = Vec::new();
        let read = self.handle()?.read_to_end(&mut contents)?;
        self.position += read as u64;
        Ok(contents)
    }

    /// Write the whole buffer at the current position
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.handle()?.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Close the file, flushing it to the OS
    pub fn close(&mut self) -> io::Result<()> {
        self.state = FileState::Closed;
        match self.file.take() {
            Some(file) => file.sync_all().or_else(|e| {
                // Pipes and character devices cannot be synced
                if e.raw_os_error() == Some(libc::EINVAL) {
                    Ok(())
                } else {
                    Err(e)
                }
            }),
            None => Ok(()),
        }
    }

    /// Get the current state
    pub fn state(&self) -> FileState {
        self.state
    }

    /// Get the current position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(|f| f.as_raw_fd())
    }
}
