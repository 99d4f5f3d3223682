// Plain passwd/shadow backend, for systems without PAM.
//
// Asks for the user name (unless we already have it) and the password,
// and checks the password against the shadow database with crypt(3).
//
use std::ffi::{CStr, CString};

use libc::c_char;
use zeroize::Zeroizing;

use qauth::Environment;

use super::converse::{Message, MessageStyle, PromptCache};
use super::{start_session, Backend, BackendError};
use crate::channel::SharedFrontend;
use crate::session::Session;

// leading fields of struct spwd; we only ever read through the pointer.
#[repr(C)]
#[allow(dead_code)]
struct Spwd {
    sp_namp: *mut c_char,
    sp_pwdp: *mut c_char,
}

extern "C" {
    fn getspnam(name: *const c_char) -> *mut Spwd;
}

#[link(name = "crypt")]
extern "C" {
    fn crypt(key: *const c_char, salt: *const c_char) -> *mut c_char;
}

/// Something that can check a password.
pub trait PasswordDb {
    fn verify(&self, user: &str, password: &[u8]) -> Result<(), BackendError>;
}

/// The system shadow database. Only readable by root.
pub struct ShadowDb;

// compare without bailing out at the first difference.
fn same_bytes(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl PasswordDb for ShadowDb {
    fn verify(&self, user: &str, password: &[u8]) -> Result<(), BackendError> {
        let failed = || BackendError::auth("Authentication failure");

        let cuser = CString::new(user).map_err(|_| failed())?;
        // getspnam is not reentrant, but the helper has only one thread.
        let hash = unsafe {
            let sp = getspnam(cuser.as_ptr());
            if sp.is_null() || (*sp).sp_pwdp.is_null() {
                debug!("ShadowDb::verify: no shadow entry for {}", user);
                return Err(failed());
            }
            Zeroizing::new(CStr::from_ptr((*sp).sp_pwdp).to_bytes().to_vec())
        };
        if hash.is_empty() {
            // no password set.
            return Ok(());
        }

        let mut key = Zeroizing::new(Vec::with_capacity(password.len() + 1));
        key.extend_from_slice(password);
        if key.contains(&0) {
            return Err(failed());
        }
        key.push(0);
        let mut salt = Zeroizing::new(hash.to_vec());
        salt.push(0);

        let ok = unsafe {
            let res = crypt(key.as_ptr() as *const c_char, salt.as_ptr() as *const c_char);
            !res.is_null() && same_bytes(CStr::from_ptr(res).to_bytes(), &hash)
        };
        if ok {
            Ok(())
        } else {
            Err(failed())
        }
    }
}

pub struct PasswdBackend {
    frontend:  SharedFrontend,
    db:        Box<dyn PasswordDb>,
    autologin: bool,
    user:      Option<String>,
    cache:     PromptCache,
}

impl PasswdBackend {
    pub fn new(frontend: SharedFrontend, db: Box<dyn PasswordDb>, autologin: bool) -> PasswdBackend {
        PasswdBackend {
            frontend,
            db,
            autologin,
            user: None,
            cache: PromptCache::new(),
        }
    }
}

impl Backend for PasswdBackend {
    fn start(&mut self, user: Option<&str>) -> Result<(), BackendError> {
        self.user = user.filter(|u| !u.is_empty()).map(|u| u.to_string());
        Ok(())
    }

    fn authenticate(&mut self) -> Result<(), BackendError> {
        if self.autologin {
            return match self.user {
                Some(ref user) => {
                    info!("PasswdBackend::authenticate: autologin for {}", user);
                    Ok(())
                },
                None => Err(BackendError::internal("autologin needs a user name")),
            };
        }

        let mut msgs = Vec::new();
        if self.user.is_none() {
            msgs.push(Message::new(MessageStyle::PromptEchoOn, "Login"));
        }
        msgs.push(Message::new(MessageStyle::PromptEchoOff, "Password"));

        let res = self.cache.converse(&mut *self.frontend.borrow_mut(), &msgs);
        let responses = res?;

        if self.user.is_none() {
            let name = responses[0].as_ref().map(|r| String::from_utf8_lossy(r).into_owned());
            match name {
                Some(name) if !name.is_empty() => self.user = Some(name),
                _ => return Err(BackendError::auth("No user name given")),
            }
        }
        let password: &[u8] = match responses.last() {
            Some(Some(r)) => r,
            _ => b"",
        };

        let user = self.user.as_ref().map(|s| s.as_str()).unwrap_or("");
        debug!("PasswdBackend::authenticate: checking password for {}", user);
        self.db.verify(user, password)
    }

    fn open_session(&mut self, session: &mut Session) -> Result<(), BackendError> {
        match self.user {
            Some(ref user) => start_session(session, user, &Environment::new()),
            None => Err(BackendError::internal("no user to start a session for")),
        }
    }

    fn user_name(&self) -> Option<String> {
        self.user.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::converse::tests::Scripted;
    use qauth::PromptType;
    use std::cell::RefCell;
    use std::rc::Rc;

    // alice / secret, nobody else.
    pub(crate) struct MockDb;

    impl PasswordDb for MockDb {
        fn verify(&self, user: &str, password: &[u8]) -> Result<(), BackendError> {
            if user == "alice" && password == b"secret" {
                Ok(())
            } else {
                Err(BackendError::auth("Authentication failure"))
            }
        }
    }

    fn backend(fe: &Rc<RefCell<Scripted>>, autologin: bool) -> PasswdBackend {
        let frontend: SharedFrontend = fe.clone();
        PasswdBackend::new(frontend, Box::new(MockDb), autologin)
    }

    #[test]
    fn test_user_known() {
        let fe = Rc::new(RefCell::new(Scripted::new("mallory", "secret")));
        let mut be = backend(&fe, false);
        be.start(Some("alice")).unwrap();
        be.authenticate().unwrap();
        assert_eq!(be.user_name(), Some("alice".to_string()));

        let fe = fe.borrow();
        assert_eq!(fe.requests.len(), 1);
        let prompts = &fe.requests[0].prompts;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].kind, PromptType::LoginPassword);
        assert!(prompts[0].hidden);
    }

    #[test]
    fn test_user_asked() {
        let fe = Rc::new(RefCell::new(Scripted::new("alice", "secret")));
        let mut be = backend(&fe, false);
        be.start(None).unwrap();
        be.authenticate().unwrap();
        assert_eq!(be.user_name(), Some("alice".to_string()));
        let kinds: Vec<_> = fe.borrow().requests[0].prompts.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PromptType::LoginUser, PromptType::LoginPassword]);
    }

    #[test]
    fn test_wrong_password() {
        let fe = Rc::new(RefCell::new(Scripted::new("alice", "hunter2")));
        let mut be = backend(&fe, false);
        be.start(Some("alice")).unwrap();
        let err = be.authenticate().unwrap_err();
        assert_eq!(err.kind, qauth::ErrorKind::Authentication);
    }

    #[test]
    fn test_autologin() {
        let fe = Rc::new(RefCell::new(Scripted::new("alice", "")));
        let mut be = backend(&fe, true);
        be.start(Some("alice")).unwrap();
        be.authenticate().unwrap();
        assert!(fe.borrow().requests.is_empty());

        let mut be = backend(&fe, true);
        be.start(None).unwrap();
        assert!(be.authenticate().is_err());
    }

    #[test]
    fn test_same_bytes() {
        assert!(same_bytes(b"$6$abc", b"$6$abc"));
        assert!(!same_bytes(b"$6$abc", b"$6$abd"));
        assert!(!same_bytes(b"$6$abc", b"$6$ab"));
    }

    #[test]
    fn test_shadow_unknown_user() {
        assert!(ShadowDb.verify("no-such-user-qauth", b"x").is_err());
    }
}
