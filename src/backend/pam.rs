// PAM backend.
//
// Drives libpam through start, authenticate, account management and
// session setup. Its questions reach the caller through pam_conv.
//
use std::ffi::{CStr, CString};
use std::ptr;

use libc::{c_char, c_int, c_void};

use qauth::{Environment, ErrorKind};

use super::pam_conv::{converse, ConvData};
use super::pam_sys::*;
use super::{start_session, Backend, BackendError};
use crate::channel::SharedFrontend;
use crate::session::Session;

pub struct PamBackend {
    service:      String,
    handle:       *mut PamHandle,
    // both must stay put while the handle exists.
    conv:         Box<PamConv>,
    _data:        Box<ConvData>,
    last_status:  c_int,
    cred:         bool,
    session_open: bool,
}

impl PamBackend {
    pub fn new(frontend: SharedFrontend, service: &str) -> PamBackend {
        let mut data = Box::new(ConvData::new(frontend));
        let conv = Box::new(PamConv {
            conv:        converse,
            appdata_ptr: &mut *data as *mut ConvData as *mut c_void,
        });
        PamBackend {
            service: service.to_string(),
            handle: ptr::null_mut(),
            conv,
            _data: data,
            last_status: PAM_SUCCESS,
            cred: false,
            session_open: false,
        }
    }

    fn strerror(&self, code: c_int) -> String {
        unsafe {
            let s = pam_strerror(self.handle, code);
            if s.is_null() {
                format!("PAM error {}", code)
            } else {
                CStr::from_ptr(s).to_string_lossy().into_owned()
            }
        }
    }

    // remember the status for pam_end, turn failures into errors.
    fn check(&mut self, what: &str, code: c_int, kind: ErrorKind) -> Result<(), BackendError> {
        self.last_status = code;
        if code == PAM_SUCCESS {
            return Ok(());
        }
        let message = self.strerror(code);
        debug!("PamBackend::{}: {} ({})", what, message, code);
        Err(BackendError { kind, message })
    }

    fn set_item_str(&mut self, item: c_int, value: &str) -> Result<(), BackendError> {
        let cvalue = CString::new(value).map_err(|_| BackendError::internal("embedded 0 byte in PAM item"))?;
        let ret = unsafe { pam_set_item(self.handle, item, cvalue.as_ptr() as *const c_void) };
        self.check("set_item", ret, ErrorKind::Internal)
    }

    fn environment(&self) -> Environment {
        let mut list = Vec::new();
        unsafe {
            let envlist = pam_getenvlist(self.handle);
            if envlist.is_null() {
                return Environment::new();
            }
            let mut i = 0;
            loop {
                let entry = *envlist.add(i);
                if entry.is_null() {
                    break;
                }
                list.push(CStr::from_ptr(entry).to_string_lossy().into_owned());
                libc::free(entry as *mut c_void);
                i += 1;
            }
            libc::free(envlist as *mut c_void);
        }
        Environment::from_list(list)
    }
}

impl Backend for PamBackend {
    fn start(&mut self, user: Option<&str>) -> Result<(), BackendError> {
        let cservice = CString::new(self.service.as_str()).map_err(|_| BackendError::internal("bad PAM service name"))?;
        let cuser = match user {
            Some(u) if !u.is_empty() => Some(CString::new(u).map_err(|_| BackendError::auth("bad user name"))?),
            _ => None,
        };
        let user_ptr = cuser.as_ref().map(|u| u.as_ptr()).unwrap_or(ptr::null());
        let ret = unsafe { pam_start(cservice.as_ptr(), user_ptr, &*self.conv, &mut self.handle) };
        if ret != PAM_SUCCESS {
            self.handle = ptr::null_mut();
        }
        info!("PamBackend::start: service {}, user {:?}", self.service, user);
        self.check("start", ret, ErrorKind::Internal)
    }

    fn authenticate(&mut self) -> Result<(), BackendError> {
        let ret = unsafe { pam_authenticate(self.handle, 0) };
        self.check("authenticate", ret, ErrorKind::Authentication)?;

        let ret = unsafe { pam_acct_mgmt(self.handle, 0) };
        if ret == PAM_NEW_AUTHTOK_REQD {
            info!("PamBackend::authenticate: password expired, changing it");
            let ret = unsafe { pam_chauthtok(self.handle, PAM_CHANGE_EXPIRED_AUTHTOK) };
            return self.check("chauthtok", ret, ErrorKind::Authentication);
        }
        self.check("acct_mgmt", ret, ErrorKind::Authentication)
    }

    fn open_session(&mut self, session: &mut Session) -> Result<(), BackendError> {
        if let Some(display) = session.display().map(|d| d.to_string()) {
            self.set_item_str(PAM_XDISPLAY, &display)?;
            self.set_item_str(PAM_TTY, &display)?;
        }

        let ret = unsafe { pam_setcred(self.handle, PAM_ESTABLISH_CRED) };
        self.check("setcred", ret, ErrorKind::Internal)?;
        self.cred = true;

        let ret = unsafe { pam_open_session(self.handle, 0) };
        self.check("open_session", ret, ErrorKind::Internal)?;
        self.session_open = true;

        let user = self
            .user_name()
            .ok_or_else(|| BackendError::internal("PAM did not tell us the user"))?;
        let env = self.environment();
        start_session(session, &user, &env)
    }

    fn user_name(&self) -> Option<String> {
        if self.handle.is_null() {
            return None;
        }
        let mut item: *const c_void = ptr::null();
        unsafe {
            if pam_get_item(self.handle, PAM_USER, &mut item) != PAM_SUCCESS || item.is_null() {
                return None;
            }
            Some(CStr::from_ptr(item as *const c_char).to_string_lossy().into_owned())
        }
    }
}

impl Drop for PamBackend {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        unsafe {
            if self.session_open {
                self.last_status = pam_close_session(self.handle, 0);
            }
            if self.cred {
                self.last_status = pam_setcred(self.handle, PAM_DELETE_CRED);
            }
            pam_end(self.handle, self.last_status);
        }
        self.handle = ptr::null_mut();
        trace!("PamBackend::drop: {} done", self.service);
    }
}
