//! GL side of the fence ring: `GL_ARB_sync` + `GL_EXT_x11_sync_object`.
//!
//! The entry points are resolved once through the caller's
//! `get_proc_address` into an immutable table. All calls must happen on the
//! thread with the compositor's GL context current.

use std::ffi::{c_char, c_void, CStr};
use std::time::Duration;

use crate::core::errors::{CapabilityError, SyncError};
use crate::core::sync::backend::{GpuSync, WaitStatus, XFence};

pub type GLenum = u32;
pub type GLbitfield = u32;
pub type GLuint = u32;
pub type GLint = i32;
pub type GLintptr = isize;
pub type GLuint64 = u64;
pub type GLsync = *const c_void;

pub const GL_VERSION: GLenum = 0x1F02;
pub const GL_EXTENSIONS: GLenum = 0x1F03;
pub const GL_NUM_EXTENSIONS: GLenum = 0x821D;
pub const GL_SYNC_GPU_COMMANDS_COMPLETE: GLenum = 0x9117;
pub const GL_ALREADY_SIGNALED: GLenum = 0x911A;
pub const GL_TIMEOUT_EXPIRED: GLenum = 0x911B;
pub const GL_CONDITION_SATISFIED: GLenum = 0x911C;
pub const GL_WAIT_FAILED: GLenum = 0x911D;
pub const GL_SYNC_FLUSH_COMMANDS_BIT: GLbitfield = 0x0000_0001;
pub const GL_TIMEOUT_IGNORED: GLuint64 = u64::MAX;
pub const GL_SYNC_X11_FENCE_EXT: GLenum = 0x90E1;

type GetStringFn = unsafe extern "system" fn(GLenum) -> *const u8;
type GetIntegervFn = unsafe extern "system" fn(GLenum, *mut GLint);
type GetStringiFn = unsafe extern "system" fn(GLenum, GLuint) -> *const u8;
type DeleteSyncFn = unsafe extern "system" fn(GLsync);
type ClientWaitSyncFn = unsafe extern "system" fn(GLsync, GLbitfield, GLuint64) -> GLenum;
type WaitSyncFn = unsafe extern "system" fn(GLsync, GLbitfield, GLuint64);
type ImportSyncFn = unsafe extern "system" fn(GLenum, GLintptr, GLbitfield) -> GLsync;
type FenceSyncFn = unsafe extern "system" fn(GLenum, GLbitfield) -> GLsync;

/// An owned GL sync object.
#[derive(Debug)]
pub struct GlSync(GLsync);

/// Resolved GL sync entry points.
#[derive(Debug, Clone, Copy)]
pub struct GlSyncApi {
    get_string: GetStringFn,
    get_integerv: GetIntegervFn,
    get_stringi: GetStringiFn,
    delete_sync: DeleteSyncFn,
    client_wait_sync: ClientWaitSyncFn,
    wait_sync: WaitSyncFn,
    import_sync: ImportSyncFn,
    fence_sync: FenceSyncFn,
}

impl GlSyncApi {
    /// Resolve every entry point, failing on the first one that is missing.
    pub fn load<F>(mut get_proc_address: F) -> Result<Self, CapabilityError>
    where
        F: FnMut(&str) -> *const c_void,
    {
        macro_rules! resolve {
            ($name:literal, $ty:ty) => {{
                let ptr = get_proc_address($name);
                if ptr.is_null() {
                    return Err(CapabilityError::MissingSymbol($name));
                }
                // SAFETY: the loader returned the non-null address of the GL
                // entry point named $name, whose signature is $ty.
                unsafe { std::mem::transmute::<*const c_void, $ty>(ptr) }
            }};
        }

        let api = Self {
            get_string: resolve!("glGetString", GetStringFn),
            get_integerv: resolve!("glGetIntegerv", GetIntegervFn),
            get_stringi: resolve!("glGetStringi", GetStringiFn),
            delete_sync: resolve!("glDeleteSync", DeleteSyncFn),
            client_wait_sync: resolve!("glClientWaitSync", ClientWaitSyncFn),
            wait_sync: resolve!("glWaitSync", WaitSyncFn),
            import_sync: resolve!("glImportSyncEXT", ImportSyncFn),
            fence_sync: resolve!("glFenceSync", FenceSyncFn),
        };
        crate::wlog!(crate::util::logging::GL, "Resolved GL sync entry points");
        Ok(api)
    }

    fn string(&self, name: GLenum) -> Option<String> {
        // SAFETY: glGetString returns null or a static NUL-terminated string.
        let ptr = unsafe { (self.get_string)(name) };
        cstr_to_string(ptr)
    }

    /// Major version from the `GL_VERSION` string.
    fn major_version(&self) -> Option<u32> {
        let version = self.string(GL_VERSION)?;
        parse_major_version(&version)
    }
}

fn cstr_to_string(ptr: *const u8) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: GL strings are NUL-terminated and live as long as the context.
    let s = unsafe { CStr::from_ptr(ptr as *const c_char) };
    Some(s.to_string_lossy().into_owned())
}

/// First integer in a `GL_VERSION` string ("4.6 (Core Profile) Mesa",
/// "OpenGL ES 3.2 ...").
fn parse_major_version(version: &str) -> Option<u32> {
    let start = version.find(|c: char| c.is_ascii_digit())?;
    let digits: String = version[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn map_wait_status(status: GLenum) -> WaitStatus {
    match status {
        GL_ALREADY_SIGNALED => WaitStatus::AlreadySignaled,
        GL_CONDITION_SATISFIED => WaitStatus::ConditionSatisfied,
        GL_TIMEOUT_EXPIRED => WaitStatus::TimeoutExpired,
        GL_WAIT_FAILED => WaitStatus::WaitFailed,
        other => {
            tracing::warn!("glClientWaitSync returned unexpected status {:#x}", other);
            WaitStatus::WaitFailed
        }
    }
}

impl GpuSync for GlSyncApi {
    type Sync = GlSync;

    fn extensions(&self) -> Result<Vec<String>, CapabilityError> {
        let major = self.major_version().ok_or_else(|| {
            CapabilityError::NoExtensionList("GL_VERSION unavailable (no current context?)".into())
        })?;

        if major >= 3 {
            let mut count: GLint = 0;
            // SAFETY: GL_NUM_EXTENSIONS writes a single GLint.
            unsafe { (self.get_integerv)(GL_NUM_EXTENSIONS, &mut count) };
            let mut extensions = Vec::with_capacity(count.max(0) as usize);
            for i in 0..count.max(0) as GLuint {
                // SAFETY: i is below GL_NUM_EXTENSIONS.
                let ptr = unsafe { (self.get_stringi)(GL_EXTENSIONS, i) };
                if let Some(ext) = cstr_to_string(ptr) {
                    extensions.push(ext);
                }
            }
            Ok(extensions)
        } else {
            let all = self
                .string(GL_EXTENSIONS)
                .ok_or_else(|| CapabilityError::NoExtensionList("GL_EXTENSIONS is null".into()))?;
            Ok(all.split_whitespace().map(str::to_owned).collect())
        }
    }

    fn import_fence(&mut self, fence: &XFence) -> Result<GlSync, SyncError> {
        // SAFETY: the fence XID was created on the server before this call
        // and a round trip has completed.
        let sync = unsafe { (self.import_sync)(GL_SYNC_X11_FENCE_EXT, fence.raw() as GLintptr, 0) };
        if sync.is_null() {
            return Err(SyncError::gpu(format!("glImportSyncEXT failed for fence {:#x}", fence.raw())));
        }
        Ok(GlSync(sync))
    }

    fn wait_sync(&mut self, sync: &GlSync) {
        // SAFETY: sync is a live sync object owned by the caller.
        unsafe { (self.wait_sync)(sync.0, 0, GL_TIMEOUT_IGNORED) };
    }

    fn fence_sync(&mut self) -> Result<GlSync, SyncError> {
        // SAFETY: plain GL call with valid enum arguments.
        let sync = unsafe { (self.fence_sync)(GL_SYNC_GPU_COMMANDS_COMPLETE, 0) };
        if sync.is_null() {
            return Err(SyncError::gpu("glFenceSync returned no sync object"));
        }
        Ok(GlSync(sync))
    }

    fn client_wait_sync(&mut self, sync: &GlSync, timeout: Duration) -> WaitStatus {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX - 1);
        // SAFETY: sync is a live sync object owned by the caller.
        let status = unsafe { (self.client_wait_sync)(sync.0, GL_SYNC_FLUSH_COMMANDS_BIT, timeout_ns) };
        map_wait_status(status)
    }

    fn delete_sync(&mut self, sync: GlSync) {
        // SAFETY: ownership of the sync object ends here.
        unsafe { (self.delete_sync)(sync.0) };
    }
}
