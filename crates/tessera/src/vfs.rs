//! The engine's virtual filesystem.

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::marshal::CText;
use crate::resource;
use crate::types::VfsMode;
use std::io;
use std::ptr;

/// Filesystem operations through the engine's storage backends.
#[derive(Debug, Clone)]
pub struct Vfs {
    ctx: Context,
    handle: Handle<resource::Vfs>,
}

impl Vfs {
    /// Creates a VFS using the context's settings, or `config` if given.
    pub fn new(ctx: &Context, config: Option<&Config>) -> Result<Self> {
        let config = config.map(|c| c.handle().acquire_owned()).transpose()?;
        let handle = Handle::<resource::Vfs>::create(ctx.runtime(), ctx.owned()?, |ctx, out| {
            let config = config.as_ref().map_or(ptr::null_mut(), |c| c.as_ptr());
            // SAFETY: ctx is held by the parent guard, the config by its own
            // guard; the engine copies the config.
            ctx.check(unsafe { (ctx.api().tessera_vfs_alloc)(ctx.as_ptr(), config, out) })
        })?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    fn flag(&self, uri: &str, call: VfsQuery) -> Result<i32> {
        let uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let vfs = self.handle.acquire()?;
        let api = ctx.api();
        let mut flag = 0;
        // SAFETY: both handles are held by their guards.
        let rc = unsafe {
            match call {
                VfsQuery::IsDir => (api.tessera_vfs_is_dir)(ctx.as_ptr(), vfs.as_ptr(), uri.as_ptr(), &mut flag),
                VfsQuery::IsFile => (api.tessera_vfs_is_file)(ctx.as_ptr(), vfs.as_ptr(), uri.as_ptr(), &mut flag),
            }
        };
        ctx.check(rc)?;
        Ok(flag)
    }

    /// Creates a directory.
    pub fn create_dir(&self, uri: &str) -> Result<()> {
        let uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let vfs = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_create_dir)(ctx.as_ptr(), vfs.as_ptr(), uri.as_ptr()) })
    }

    /// Returns true if `uri` is a directory.
    pub fn is_dir(&self, uri: &str) -> Result<bool> {
        Ok(self.flag(uri, VfsQuery::IsDir)? != 0)
    }

    /// Returns true if `uri` is a file.
    pub fn is_file(&self, uri: &str) -> Result<bool> {
        Ok(self.flag(uri, VfsQuery::IsFile)? != 0)
    }

    /// Size of the file at `uri` in bytes.
    pub fn file_size(&self, uri: &str) -> Result<u64> {
        let uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let vfs = self.handle.acquire()?;
        let mut size = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_file_size)(ctx.as_ptr(), vfs.as_ptr(), uri.as_ptr(), &mut size) })?;
        Ok(size)
    }

    /// Removes the file at `uri`.
    pub fn remove_file(&self, uri: &str) -> Result<()> {
        let uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let vfs = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_remove_file)(ctx.as_ptr(), vfs.as_ptr(), uri.as_ptr()) })
    }

    /// Opens the file at `uri`.
    pub fn open(&self, uri: &str, mode: VfsMode) -> Result<VfsFile> {
        let c_uri = CText::utf8(uri)?;
        let ctx = self.ctx.guard()?;
        let handle = Handle::<resource::VfsFile>::create(ctx.runtime(), self.handle.acquire_owned()?, |vfs, out| {
            // SAFETY: ctx is held by its guard, the vfs by the parent guard.
            ctx.check(unsafe {
                (ctx.api().tessera_vfs_open)(ctx.as_ptr(), vfs.as_ptr(), c_uri.as_ptr(), mode.to_raw(), out)
            })
        })?;
        Ok(VfsFile {
            ctx: self.ctx.clone(),
            handle,
            uri: uri.to_owned(),
        })
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::Vfs> {
        &self.handle
    }
}

#[derive(Clone, Copy)]
enum VfsQuery {
    IsDir,
    IsFile,
}

/// A file opened through a [`Vfs`].
#[derive(Debug, Clone)]
pub struct VfsFile {
    ctx: Context,
    handle: Handle<resource::VfsFile>,
    uri: String,
}

impl VfsFile {
    /// Fills `buf` with the bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let fh = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards; buf is writable for
        // its whole length.
        ctx.check(unsafe {
            (ctx.api().tessera_vfs_read)(ctx.as_ptr(), fh.as_ptr(), offset, buf.as_mut_ptr().cast(), buf.len() as u64)
        })
    }

    /// Appends `data` at the current end of the file.
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let fh = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe {
            (ctx.api().tessera_vfs_write)(ctx.as_ptr(), fh.as_ptr(), data.as_ptr().cast(), data.len() as u64)
        })
    }

    /// Flushes written bytes to storage.
    pub fn sync(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let fh = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_sync)(ctx.as_ptr(), fh.as_ptr()) })
    }

    /// Closes the file. The handle stays valid until dropped.
    pub fn close(&self) -> Result<()> {
        let ctx = self.ctx.guard()?;
        let fh = self.handle.acquire()?;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_close)(ctx.as_ptr(), fh.as_ptr()) })
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> Result<bool> {
        let ctx = self.ctx.guard()?;
        let fh = self.handle.acquire()?;
        let mut closed = 0;
        // SAFETY: both handles are held by their guards.
        ctx.check(unsafe { (ctx.api().tessera_vfs_fh_is_closed)(ctx.as_ptr(), fh.as_ptr(), &mut closed) })?;
        Ok(closed != 0)
    }

    /// URI the file was opened at.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle<resource::VfsFile> {
        &self.handle
    }
}

impl io::Write for VfsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        VfsFile::write_all(self, buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(into_io)
    }
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use std::io::Write;

    fn file_uri(dir: &tempfile::TempDir, name: &str) -> String {
        format!("file://{}", dir.path().join(name).display())
    }

    #[test]
    fn io_write_reports_every_byte() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::new(&ctx(), None).unwrap();
        let uri = file_uri(&dir, "io.bin");

        let mut file = vfs.open(&uri, VfsMode::Write).unwrap();
        assert_eq!(io::Write::write(&mut file, b"abc").unwrap(), 3);
        io::Write::write_all(&mut file, b"defg").unwrap();
        file.close().unwrap();
        assert_eq!(vfs.file_size(&uri).unwrap(), 7);
        assert!(io::Write::write(&mut file, b"h").is_err());
    }

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let vfs = Vfs::new(&ctx, None).unwrap();
        let uri = file_uri(&dir, "data.bin");

        let mut file = vfs.open(&uri, VfsMode::Write).unwrap();
        file.write_all(b"hello ").unwrap();
        write!(file, "world").unwrap();
        file.flush().unwrap();
        file.close().unwrap();
        assert!(file.is_closed().unwrap());

        assert!(vfs.is_file(&uri).unwrap());
        assert!(!vfs.is_dir(&uri).unwrap());
        assert_eq!(vfs.file_size(&uri).unwrap(), 11);

        let reader = vfs.open(&uri, VfsMode::Read).unwrap();
        let mut buf = [0u8; 5];
        reader.read_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert!(reader.read_at(8, &mut buf).is_err());

        vfs.remove_file(&uri).unwrap();
        assert!(!vfs.is_file(&uri).unwrap());
    }

    #[test]
    fn append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let vfs = Vfs::new(&ctx, None).unwrap();
        let uri = file_uri(&dir, "log.txt");

        let file = vfs.open(&uri, VfsMode::Write).unwrap();
        file.write_all(b"ab").unwrap();
        file.close().unwrap();
        let file = vfs.open(&uri, VfsMode::Append).unwrap();
        file.write_all(b"cd").unwrap();
        file.close().unwrap();
        assert_eq!(vfs.file_size(&uri).unwrap(), 4);
    }

    #[test]
    fn directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let vfs = Vfs::new(&ctx, Some(&Config::in_runtime(ctx.runtime()).unwrap())).unwrap();
        let uri = file_uri(&dir, "nested");
        vfs.create_dir(&uri).unwrap();
        assert!(vfs.is_dir(&uri).unwrap());
        assert!(vfs.remove_file(&uri).is_err());
    }

    #[test]
    fn writing_a_closed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let vfs = Vfs::new(&ctx, None).unwrap();
        let file = vfs.open(&file_uri(&dir, "closed"), VfsMode::Write).unwrap();
        file.close().unwrap();
        assert!(file.write_all(b"x").is_err());
    }

    #[test]
    fn file_keeps_vfs_alive() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let vfs = Vfs::new(&ctx, None).unwrap();
        let vfs_ptr = vfs.handle().acquire().unwrap().as_ptr() as usize;
        let file = vfs.open(&file_uri(&dir, "f"), VfsMode::Write).unwrap();
        let fh_ptr = file.handle().acquire().unwrap().as_ptr() as usize;
        drop(vfs);
        assert!(tessera_sim::is_live(vfs_ptr));
        drop(file);
        assert!(tessera_sim::freed_before(fh_ptr, vfs_ptr));
    }
}
