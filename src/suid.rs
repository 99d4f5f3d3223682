use std::ffi::CStr;
use std::io;

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn current_uid() -> u32 {
    unsafe { libc::getuid() }
}

pub fn current_gid() -> u32 {
    unsafe { libc::getgid() }
}

// Become uid/gid for good, with the supplementary groups of `name`.
// Runs in the child between fork and exec, so no allocation here.
pub fn switch_ugid(uid: u32, gid: u32, name: &CStr) -> io::Result<()> {
    unsafe {
        if libc::setgid(gid) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::initgroups(name.as_ptr(), gid) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setuid(uid) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
