//! Virtual filesystem backed by the local filesystem.

use crate::error::{SimError, SimResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use tessera_sys::{TESSERA_VFS_APPEND, TESSERA_VFS_READ, TESSERA_VFS_WRITE};

/// Maps a URI to a local path; `file://` is optional.
pub(crate) fn local_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

#[derive(Debug, Default)]
pub(crate) struct VfsObj;

impl VfsObj {
    pub(crate) fn create_dir(&self, uri: &str) -> SimResult<()> {
        fs::create_dir_all(local_path(uri)).map_err(|e| SimError::io(format!("create directory '{uri}'"), e))
    }

    pub(crate) fn is_dir(&self, uri: &str) -> bool {
        local_path(uri).is_dir()
    }

    pub(crate) fn is_file(&self, uri: &str) -> bool {
        local_path(uri).is_file()
    }

    pub(crate) fn file_size(&self, uri: &str) -> SimResult<u64> {
        let meta = fs::metadata(local_path(uri)).map_err(|e| SimError::io(format!("stat '{uri}'"), e))?;
        if !meta.is_file() {
            return Err(SimError::invalid(format!("'{uri}' is not a file")));
        }
        Ok(meta.len())
    }

    pub(crate) fn remove_file(&self, uri: &str) -> SimResult<()> {
        if self.is_dir(uri) {
            return Err(SimError::invalid(format!("'{uri}' is a directory")));
        }
        fs::remove_file(local_path(uri)).map_err(|e| SimError::io(format!("remove '{uri}'"), e))
    }

    pub(crate) fn open(&self, uri: &str, mode: u32) -> SimResult<FileObj> {
        let path = local_path(uri);
        let mut options = OpenOptions::new();
        match mode {
            TESSERA_VFS_READ => options.read(true),
            TESSERA_VFS_WRITE => options.write(true).create(true).truncate(true),
            TESSERA_VFS_APPEND => options.append(true).create(true),
            other => return Err(SimError::invalid(format!("unknown vfs mode {other}"))),
        };
        let file = options
            .open(&path)
            .map_err(|e| SimError::io(format!("open '{uri}'"), e))?;
        Ok(FileObj {
            uri: uri.to_owned(),
            mode,
            file: Some(file),
        })
    }
}

/// An open file handle; `file` is gone once closed.
#[derive(Debug)]
pub(crate) struct FileObj {
    uri: String,
    mode: u32,
    file: Option<File>,
}

impl FileObj {
    fn file(&mut self) -> SimResult<&mut File> {
        let uri = &self.uri;
        self.file
            .as_mut()
            .ok_or_else(|| SimError::state(format!("file '{uri}' is closed")))
    }

    pub(crate) fn read(&mut self, offset: u64, buf: &mut [u8]) -> SimResult<()> {
        if self.mode != TESSERA_VFS_READ {
            return Err(SimError::state(format!("file '{}' is not open for reading", self.uri)));
        }
        let context = format!("read {} bytes at {offset} from '{}'", buf.len(), self.uri);
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| SimError::io(context, e))
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> SimResult<()> {
        if self.mode == TESSERA_VFS_READ {
            return Err(SimError::state(format!("file '{}' is open for reading", self.uri)));
        }
        let context = format!("write to '{}'", self.uri);
        self.file()?.write_all(buf).map_err(|e| SimError::io(context, e))
    }

    pub(crate) fn sync(&mut self) -> SimResult<()> {
        let context = format!("sync '{}'", self.uri);
        self.file()?.sync_all().map_err(|e| SimError::io(context, e))
    }

    pub(crate) fn close(&mut self) -> SimResult<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SimError::state(format!("file '{}' is already closed", self.uri)))?;
        file.flush().map_err(|e| SimError::io(format!("close '{}'", self.uri), e))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_append_read() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("file://{}/data.bin", dir.path().display());
        let vfs = VfsObj;

        let mut file = vfs.open(&uri, TESSERA_VFS_WRITE).unwrap();
        file.write(b"hello").unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(file.write(b"x").is_err());

        let mut file = vfs.open(&uri, TESSERA_VFS_APPEND).unwrap();
        file.write(b" world").unwrap();
        file.sync().unwrap();
        file.close().unwrap();
        assert_eq!(vfs.file_size(&uri).unwrap(), 11);

        let mut file = vfs.open(&uri, TESSERA_VFS_READ).unwrap();
        let mut buf = [0u8; 5];
        file.read(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert!(file.read(8, &mut buf).is_err());
    }

    #[test]
    fn directories() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("{}/nested/deeper", dir.path().display());
        let vfs = VfsObj;
        vfs.create_dir(&uri).unwrap();
        assert!(vfs.is_dir(&uri));
        assert!(!vfs.is_file(&uri));
        assert!(vfs.remove_file(&uri).is_err());
        assert!(vfs.open(&format!("{uri}/missing"), TESSERA_VFS_READ).is_err());
    }
}
