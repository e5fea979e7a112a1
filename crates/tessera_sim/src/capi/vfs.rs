//! Virtual filesystem and file handles.

use crate::error::SimError;
use crate::model::ConfigObj;
use crate::state::{ctx_call, free_slot, id, put, raw_bytes, text, write};
use crate::vfs::{FileObj, VfsObj};
use std::ffi::{c_char, c_void};
use tessera_sys::*;

/// Allocates a VFS.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `config` - Optional config; may be null
/// * `vfs` - Output pointer for the VFS
///
/// # Safety
///
/// `vfs` must be a valid pointer; `config` null or from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_alloc(
    ctx: *mut tessera_ctx_t,
    config: *mut tessera_config_t,
    vfs: *mut *mut tessera_vfs_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        if !config.is_null() {
            sim.objects.get::<ConfigObj>(config as usize)?;
        }
        let new = sim.alloc(ctx, VfsObj, &[])?;
        put(vfs, new)
    })
}

/// Frees a VFS and nulls `*vfs`.
///
/// # Safety
///
/// `vfs` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_free(vfs: *mut *mut tessera_vfs_t) {
    free_slot(vfs);
}

/// Creates `uri` and any missing parents.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_create_dir(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "uri")?;
        sim.objects.get::<VfsObj>(id(vfs, "vfs")?)?.create_dir(&uri)
    })
}

/// # Safety
///
/// `uri` must be a valid null-terminated string; `is_dir` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_is_dir(
    ctx: *mut tessera_ctx_t,
    vfs: *mut tessera_vfs_t,
    uri: *const c_char,
    is_dir: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "uri")?;
        let found = sim.objects.get::<VfsObj>(id(vfs, "vfs")?)?.is_dir(&uri);
        write(is_dir, i32::from(found))
    })
}

/// # Safety
///
/// `uri` must be a valid null-terminated string; `is_file` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_is_file(
    ctx: *mut tessera_ctx_t,
    vfs: *mut tessera_vfs_t,
    uri: *const c_char,
    is_file: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "uri")?;
        let found = sim.objects.get::<VfsObj>(id(vfs, "vfs")?)?.is_file(&uri);
        write(is_file, i32::from(found))
    })
}

/// # Safety
///
/// `uri` must be a valid null-terminated string; `size` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_file_size(
    ctx: *mut tessera_ctx_t,
    vfs: *mut tessera_vfs_t,
    uri: *const c_char,
    size: *mut u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "uri")?;
        let len = sim.objects.get::<VfsObj>(id(vfs, "vfs")?)?.file_size(&uri)?;
        write(size, len)
    })
}

/// Removes a file; directories are rejected.
///
/// # Safety
///
/// `uri` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_remove_file(ctx: *mut tessera_ctx_t, vfs: *mut tessera_vfs_t, uri: *const c_char) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let uri = text(uri, "uri")?;
        sim.objects.get::<VfsObj>(id(vfs, "vfs")?)?.remove_file(&uri)
    })
}

/// Opens a file.
///
/// # Arguments
///
/// * `mode` - `TESSERA_VFS_READ` (file must exist), `TESSERA_VFS_WRITE`
///   (truncates) or `TESSERA_VFS_APPEND`
/// * `fh` - Output pointer for the file handle
///
/// # Safety
///
/// `uri` must be a valid null-terminated string; `fh` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_open(
    ctx: *mut tessera_ctx_t,
    vfs: *mut tessera_vfs_t,
    uri: *const c_char,
    mode: u32,
    fh: *mut *mut tessera_vfs_fh_t,
) -> capi_return_t {
    ctx_call(ctx, |sim, ctx| {
        let uri = text(uri, "uri")?;
        let vfs_id = id(vfs, "vfs")?;
        let file = sim.objects.get::<VfsObj>(vfs_id)?.open(&uri, mode)?;
        let new = sim.alloc(ctx, file, &[vfs_id])?;
        put(fh, new)
    })
}

/// Frees a file handle and nulls `*fh`. An open file is closed first.
///
/// # Safety
///
/// `fh` must be null or a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_fh_free(fh: *mut *mut tessera_vfs_fh_t) {
    free_slot(fh);
}

/// Reads exactly `nbytes` at `offset` into `buffer`.
///
/// # Safety
///
/// `buffer` must be writable for `nbytes` bytes.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_read(
    ctx: *mut tessera_ctx_t,
    fh: *mut tessera_vfs_fh_t,
    offset: u64,
    buffer: *mut c_void,
    nbytes: u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let file = sim.objects.get_mut::<FileObj>(id(fh, "vfs file")?)?;
        if nbytes == 0 {
            return Ok(());
        }
        if buffer.is_null() {
            return Err(SimError::Null("read buffer"));
        }
        let buf = std::slice::from_raw_parts_mut(buffer.cast::<u8>(), nbytes as usize);
        file.read(offset, buf)
    })
}

/// Writes `nbytes` from `buffer`.
///
/// # Safety
///
/// `buffer` must be readable for `nbytes` bytes.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_write(
    ctx: *mut tessera_ctx_t,
    fh: *mut tessera_vfs_fh_t,
    buffer: *const c_void,
    nbytes: u64,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let bytes = raw_bytes(buffer, nbytes, "write buffer")?;
        sim.objects.get_mut::<FileObj>(id(fh, "vfs file")?)?.write(bytes)
    })
}

/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_sync(ctx: *mut tessera_ctx_t, fh: *mut tessera_vfs_fh_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| sim.objects.get_mut::<FileObj>(id(fh, "vfs file")?)?.sync())
}

/// Closes the file; later reads and writes fail.
///
/// # Safety
///
/// Handles must come from this engine.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_close(ctx: *mut tessera_ctx_t, fh: *mut tessera_vfs_fh_t) -> capi_return_t {
    ctx_call(ctx, |sim, _| sim.objects.get_mut::<FileObj>(id(fh, "vfs file")?)?.close())
}

/// # Safety
///
/// `is_closed` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_vfs_fh_is_closed(
    ctx: *mut tessera_ctx_t,
    fh: *mut tessera_vfs_fh_t,
    is_closed: *mut i32,
) -> capi_return_t {
    ctx_call(ctx, |sim, _| {
        let closed = sim.objects.get::<FileObj>(id(fh, "vfs file")?)?.is_closed();
        write(is_closed, i32::from(closed))
    })
}
