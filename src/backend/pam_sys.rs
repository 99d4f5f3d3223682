// Raw libpam bindings, only the calls the PAM backend makes.
//
// The message and response layouts are needed by the conversation
// callback in every build; the rest only with the pam feature.
//
use libc::{c_char, c_int};
#[cfg(feature = "pam")]
use libc::c_void;

#[cfg(feature = "pam")]
#[repr(C)]
pub struct PamHandle {
    _private: [u8; 0],
}

#[repr(C)]
pub struct PamMessage {
    pub msg_style: c_int,
    pub msg:       *const c_char,
}

#[repr(C)]
pub struct PamResponse {
    pub resp:         *mut c_char,
    pub resp_retcode: c_int,
}

#[cfg(feature = "pam")]
pub type ConvFn = extern "C" fn(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata_ptr: *mut c_void,
) -> c_int;

#[cfg(feature = "pam")]
#[repr(C)]
pub struct PamConv {
    pub conv:        ConvFn,
    pub appdata_ptr: *mut c_void,
}

pub const PAM_SUCCESS: c_int = 0;
pub const PAM_BUF_ERR: c_int = 5;
pub const PAM_CONV_ERR: c_int = 19;

#[cfg(feature = "pam")]
pub const PAM_NEW_AUTHTOK_REQD: c_int = 12;

#[cfg(feature = "pam")]
pub const PAM_USER: c_int = 2;
#[cfg(feature = "pam")]
pub const PAM_TTY: c_int = 3;
#[cfg(feature = "pam")]
pub const PAM_XDISPLAY: c_int = 11;

#[cfg(feature = "pam")]
pub const PAM_ESTABLISH_CRED: c_int = 0x2;
#[cfg(feature = "pam")]
pub const PAM_DELETE_CRED: c_int = 0x4;
#[cfg(feature = "pam")]
pub const PAM_CHANGE_EXPIRED_AUTHTOK: c_int = 0x20;

#[cfg(feature = "pam")]
#[link(name = "pam")]
extern "C" {
    pub fn pam_start(
        service_name: *const c_char,
        user: *const c_char,
        pam_conversation: *const PamConv,
        pamh: *mut *mut PamHandle,
    ) -> c_int;
    pub fn pam_end(pamh: *mut PamHandle, pam_status: c_int) -> c_int;
    pub fn pam_authenticate(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_acct_mgmt(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_chauthtok(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_setcred(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_open_session(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_close_session(pamh: *mut PamHandle, flags: c_int) -> c_int;
    pub fn pam_set_item(pamh: *mut PamHandle, item_type: c_int, item: *const c_void) -> c_int;
    pub fn pam_get_item(pamh: *const PamHandle, item_type: c_int, item: *mut *const c_void) -> c_int;
    pub fn pam_getenvlist(pamh: *mut PamHandle) -> *mut *mut c_char;
    pub fn pam_strerror(pamh: *mut PamHandle, errnum: c_int) -> *const c_char;
}
