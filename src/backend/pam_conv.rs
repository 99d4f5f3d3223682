// The PAM conversation callback.
//
// PAM calls `converse` from deep inside pam_authenticate and friends.
// It gets a pointer to ConvData, which holds the frontend and the prompt
// cache, and does a complete round trip to the caller before it returns.
// Nothing in here needs libpam itself.
//
use std::ffi::CStr;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use libc::{c_char, c_int, c_void};

use qauth::ErrorKind;

use super::converse::{ConvError, Message, MessageStyle, PromptCache, Responses, MAX_NUM_MSG};
use super::pam_sys::{PamMessage, PamResponse, PAM_BUF_ERR, PAM_CONV_ERR, PAM_SUCCESS};
use crate::channel::SharedFrontend;

pub struct ConvData {
    pub frontend: SharedFrontend,
    pub cache:    PromptCache,
}

impl ConvData {
    pub fn new(frontend: SharedFrontend) -> ConvData {
        ConvData {
            frontend,
            cache: PromptCache::new(),
        }
    }

    fn fail(&self, message: &str, code: c_int) -> c_int {
        warn!("pam_conv::converse: {}", message);
        self.frontend.borrow_mut().error(message, ErrorKind::Internal);
        code
    }
}

// Allocate the response array PAM wants: one entry per message, every
// answer in its own malloc'ed buffer. All or nothing. An answer ends at
// its first NUL, the way PAM will read it.
unsafe fn alloc_responses(responses: &Responses) -> Option<*mut PamResponse> {
    let n = responses.len();
    let arr = libc::calloc(n, mem::size_of::<PamResponse>()) as *mut PamResponse;
    if arr.is_null() {
        return None;
    }
    for (i, r) in responses.iter().enumerate() {
        if let Some(bytes) = r {
            let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let buf = libc::calloc(len + 1, 1) as *mut u8;
            if buf.is_null() {
                free_responses(arr, i);
                return None;
            }
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf, len);
            (*arr.add(i)).resp = buf as *mut c_char;
        }
    }
    Some(arr)
}

// Wipe and free the first `n` answers, then the array.
unsafe fn free_responses(arr: *mut PamResponse, n: usize) {
    for i in 0..n {
        let resp = (*arr.add(i)).resp;
        if !resp.is_null() {
            ptr::write_bytes(resp, 0, libc::strlen(resp));
            libc::free(resp as *mut c_void);
        }
    }
    ptr::write_bytes(arr, 0, n);
    libc::free(arr as *mut c_void);
}

unsafe fn converse_impl(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata: *mut c_void,
) -> c_int
{
    // without appdata there is no one to tell.
    if resp.is_null() || appdata.is_null() {
        return PAM_CONV_ERR;
    }
    *resp = ptr::null_mut();
    let data = &mut *(appdata as *mut ConvData);

    if num_msg <= 0 || num_msg as usize > MAX_NUM_MSG {
        let e = ConvError::BatchSize(num_msg.max(0) as usize);
        return data.fail(&e.to_string(), PAM_CONV_ERR);
    }
    if msg.is_null() {
        return data.fail("conversation without messages", PAM_CONV_ERR);
    }

    let mut msgs = Vec::with_capacity(num_msg as usize);
    for i in 0..num_msg as usize {
        let m = *msg.add(i);
        if m.is_null() {
            return data.fail(&format!("conversation message {} missing", i), PAM_CONV_ERR);
        }
        let text = if (*m).msg.is_null() {
            String::new()
        } else {
            CStr::from_ptr((*m).msg).to_string_lossy().into_owned()
        };
        msgs.push(Message::new(MessageStyle::from_raw((*m).msg_style), text));
    }

    let res = data.cache.converse(&mut *data.frontend.borrow_mut(), &msgs);
    let responses = match res {
        Ok(r) => r,
        Err(e) => return data.fail(&e.to_string(), PAM_CONV_ERR),
    };
    match alloc_responses(&responses) {
        Some(arr) => {
            *resp = arr;
            PAM_SUCCESS
        },
        None => data.fail("out of memory for conversation responses", PAM_BUF_ERR),
    }
}

// Called by PAM. Nothing may unwind out of here.
pub extern "C" fn converse(
    num_msg: c_int,
    msg: *mut *const PamMessage,
    resp: *mut *mut PamResponse,
    appdata: *mut c_void,
) -> c_int
{
    let res = panic::catch_unwind(AssertUnwindSafe(|| unsafe { converse_impl(num_msg, msg, resp, appdata) }));
    match res {
        Ok(code) => code,
        Err(_) => {
            error!("pam_conv::converse: panic in conversation");
            PAM_CONV_ERR
        },
    }
}
