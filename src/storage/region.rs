use crate::models::registers::{RegisterBlock, BLOCK_SIZE};
use crate::storage::StorageError;
use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A read/write shared mapping of exactly one register block.
///
/// The mapping and its file handle live as long as the region. Dropping or
/// [`close`](SharedRegion::close)-ing it unmaps first and then closes the
/// file; the file itself is never removed.
pub struct SharedRegion {
    path: PathBuf,
    // Field order matters: the map must go before the file it maps.
    map: MmapMut,
    file: File,
}

impl SharedRegion {
    /// Open (or create) the register file at `path` and map it.
    ///
    /// An existing file is resized to exactly [`BLOCK_SIZE`] bytes only if it
    /// has a different length. A missing file is created zero-filled. Any
    /// other open failure is returned as is.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => {
                let len = file
                    .metadata()
                    .map_err(|source| StorageError::Stat { path: path.clone(), source })?
                    .len();
                if len != BLOCK_SIZE as u64 {
                    debug!("Resizing {} from {} to {} bytes", path.display(), len, BLOCK_SIZE);
                    file.set_len(BLOCK_SIZE as u64)
                        .map_err(|source| StorageError::Resize { path: path.clone(), source })?;
                }
                file
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Creating register file {}", path.display());
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|source| StorageError::Create { path: path.clone(), source })?;
                file.write_all(&[0u8; BLOCK_SIZE])
                    .map_err(|source| StorageError::Create { path: path.clone(), source })?;
                file
            }
            Err(source) => return Err(StorageError::Open { path, source }),
        };

        // SAFETY: the file is exactly BLOCK_SIZE bytes long at this point and
        // the length is re-checked before every access in `ensure_size`.
        // Other processes may write the same bytes concurrently; the mapping
        // is only ever accessed through copies, never through references
        // handed out to callers.
        let map = unsafe { MmapOptions::new().len(BLOCK_SIZE).map_mut(&file) }
            .map_err(|source| StorageError::Map { path: path.clone(), source })?;

        debug!("Mapped {} ({} bytes)", path.display(), BLOCK_SIZE);

        Ok(Self { path, map, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the block currently in the mapping.
    pub fn read(&self) -> Result<RegisterBlock, StorageError> {
        self.ensure_size()?;
        Ok(RegisterBlock::decode(&self.map[..]))
    }

    /// Encode `block` over the whole mapping. The write is visible to other
    /// mappers of the file immediately.
    pub fn write(&mut self, block: &RegisterBlock) -> Result<(), StorageError> {
        self.ensure_size()?;
        block.encode(&mut self.map[..], 0);
        Ok(())
    }

    /// Read-modify-write that only replaces the two output registers.
    pub fn write_outputs(&mut self, h_out: i16, t_out: i16) -> Result<(), StorageError> {
        let mut block = self.read()?;
        block.h_out = h_out;
        block.t_out = t_out;
        self.write(&block)
    }

    /// Unmap, then close the file handle.
    pub fn close(self) {
        let Self { path, map, file } = self;
        drop(map);
        drop(file);
        debug!("Unmapped {}", path.display());
    }

    // A file truncated by someone else would fault on access; refuse instead.
    fn ensure_size(&self) -> Result<(), StorageError> {
        let actual = self
            .file
            .metadata()
            .map_err(|source| StorageError::Stat { path: self.path.clone(), source })?
            .len();
        if actual != BLOCK_SIZE as u64 {
            return Err(StorageError::SizeChanged {
                path: self.path.clone(),
                expected: BLOCK_SIZE as u64,
                actual,
            });
        }
        Ok(())
    }
}
