//! # WASI preview1 stub implementations
//!
//! Guest pointers arrive as `i32` and are reinterpreted as unsigned offsets
//! into the instance's exported memory. Every access goes through a
//! `MemoryView`, so a bad pointer yields `EFAULT` instead of a host fault.

use wasmtime::Caller;
use wasmtime::Extern;

use crate::context::HostCtx;
use crate::memory::MemoryView;

// Values from the preview1 ABI, `wasi_snapshot_preview1.witx`: the `errno`
// and `filetype` enums, and the wasm32 layouts of `fdstat` and `ciovec`.
pub const ERRNO_SUCCESS: i32 = 0;
pub const ERRNO_BADF: i32 = 8;
pub const ERRNO_FAULT: i32 = 21;

const FILETYPE_CHARACTER_DEVICE: u8 = 2;
/// `fdstat { fs_filetype: u8, fs_flags: u16, fs_rights_base: u64, fs_rights_inheriting: u64 }`
const FDSTAT_SIZE: usize = 24;
/// `ciovec { buf: u32, buf_len: u32 }`
const IOVEC_SIZE: u64 = 8;

fn offset(ptr: i32) -> u64 {
    ptr as u32 as u64
}

/// Runs `f` over the guest's exported memory, mapping any bounds failure
/// (or a missing memory) to `EFAULT`.
fn with_memory<F>(caller: &mut Caller<'_, HostCtx>, f: F) -> i32
where
    F: FnOnce(&mut MemoryView<'_>) -> crate::error::Result<()>,
{
    let name = caller.data().memory_export.clone();
    let Some(memory) = caller.get_export(&name).and_then(Extern::into_memory) else {
        return ERRNO_FAULT;
    };
    let mut view = MemoryView::new(memory.data_mut(caller));
    match f(&mut view) {
        Ok(()) => ERRNO_SUCCESS,
        Err(e) => {
            tracing::debug!(error = %e, "stub rejected guest pointer");
            ERRNO_FAULT
        }
    }
}

pub fn clock_time_get(caller: &mut Caller<'_, HostCtx>, _clock_id: i32, _precision: i64, time_ptr: i32) -> i32 {
    let now = caller.data().clock.now_nanos();
    with_memory(caller, |mem| mem.write_u64(offset(time_ptr), now))
}

pub fn fd_write(
    caller: &mut Caller<'_, HostCtx>,
    fd: i32,
    iovs: i32,
    iovs_len: i32,
    nwritten_ptr: i32,
) -> i32 {
    with_memory(caller, |mem| {
        let mut total: u32 = 0;
        let mut text = Vec::new();
        for i in 0..offset(iovs_len) {
            let iov = offset(iovs) + i * IOVEC_SIZE;
            let buf = mem.read_u32(iov)? as u64;
            let len = mem.read_u32(iov + 4)?;
            if fd == 1 || fd == 2 {
                text.extend_from_slice(mem.read(buf, len as u64)?);
            }
            total = total.wrapping_add(len);
        }
        if !text.is_empty() {
            tracing::debug!(fd, text = %String::from_utf8_lossy(&text), "guest output");
        }
        mem.write_u32(offset(nwritten_ptr), total)
    })
}

pub fn fd_seek(caller: &mut Caller<'_, HostCtx>, newoffset_ptr: i32) -> i32 {
    with_memory(caller, |mem| mem.write_u64(offset(newoffset_ptr), 0))
}

/// `environ_sizes_get` and `args_sizes_get`: zero entries, zero bytes.
pub fn sizes_get(caller: &mut Caller<'_, HostCtx>, count_ptr: i32, size_ptr: i32) -> i32 {
    with_memory(caller, |mem| {
        mem.write_u32(offset(count_ptr), 0)?;
        mem.write_u32(offset(size_ptr), 0)
    })
}

pub fn fd_fdstat_get(caller: &mut Caller<'_, HostCtx>, fd: i32, stat_ptr: i32) -> i32 {
    if !(0..=2).contains(&fd) {
        return ERRNO_BADF;
    }
    let mut stat = [0u8; FDSTAT_SIZE];
    stat[0] = FILETYPE_CHARACTER_DEVICE;
    with_memory(caller, |mem| mem.write(offset(stat_ptr), &stat))
}

pub fn proc_exit(code: i32) -> wasmtime::Error {
    tracing::debug!(code, "guest called proc_exit");
    wasmtime::Error::new(wasmtime_wasi::I32Exit(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_pointers_are_high_offsets() {
        assert_eq!(offset(-1), u32::MAX as u64);
        assert_eq!(offset(1024), 1024);
    }
}
