use crate::models::registers::{RegisterBlock, BLOCK_SIZE};
use log::debug;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const REGISTER_FILE_NAME: &str = "rpi-sense-emu-humidity";

const SHM_DIR: &str = "/dev/shm";

/// Location of the humidity sensor's register file.
///
/// On Windows this lives in the per-user temp directory. Elsewhere
/// `/dev/shm` is preferred so the file stays in memory, falling back to the
/// system temp directory when it is missing.
pub fn register_file_path() -> PathBuf {
    let dir = if cfg!(windows) {
        env::temp_dir()
    } else if Path::new(SHM_DIR).is_dir() {
        PathBuf::from(SHM_DIR)
    } else {
        env::temp_dir()
    };
    dir.join(REGISTER_FILE_NAME)
}

/// Decode the register file the way any other process on the board would.
/// A file that isn't exactly [`BLOCK_SIZE`] bytes long is rejected.
pub fn read_register_file<P: AsRef<Path>>(path: P) -> io::Result<RegisterBlock> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    if bytes.len() != BLOCK_SIZE {
        let kind = if bytes.len() < BLOCK_SIZE {
            io::ErrorKind::UnexpectedEof
        } else {
            io::ErrorKind::InvalidData
        };
        return Err(io::Error::new(
            kind,
            format!(
                "{} holds {} bytes, expected {}",
                path.display(),
                bytes.len(),
                BLOCK_SIZE
            ),
        ));
    }
    let block = RegisterBlock::decode(&bytes);
    debug!("read_register_file {}: {:?}", path.display(), block);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_register_file_path_is_stable() {
        let path = register_file_path();
        assert_eq!(path, register_file_path());
        assert_eq!(path.file_name().unwrap(), REGISTER_FILE_NAME);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_register_file_path_prefers_shm() {
        if Path::new(SHM_DIR).is_dir() {
            assert_eq!(register_file_path(), Path::new(SHM_DIR).join(REGISTER_FILE_NAME));
        }
    }

    #[test]
    fn test_read_register_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        RegisterBlock::default().encode(&mut buf, 0);
        temp_file.write_all(&buf).unwrap();

        let block = read_register_file(temp_file.path()).unwrap();
        assert!(block.is_initialised());
        assert_eq!(block.h1_out, 25600);
    }

    #[test]
    fn test_read_short_register_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[2u8; 4]).unwrap();

        let err = read_register_file(temp_file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_grown_register_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let mut buf = [0u8; BLOCK_SIZE + 3];
        RegisterBlock::default().encode(&mut buf, 0);
        temp_file.write_all(&buf).unwrap();

        let err = read_register_file(temp_file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
