// Authentication backends.
//
// A backend checks credentials and opens sessions. Whenever it needs
// something from the user it goes through the shared Frontend, usually
// by way of a PromptCache conversation.
//
use std::error::Error;
use std::fmt;

use qauth::{Environment, ErrorKind};

use crate::channel::SharedFrontend;
use crate::config::Config;
use crate::helper::Launch;
use crate::session::Session;
use crate::unixuser::User;

pub mod classify;
pub mod converse;
#[cfg(feature = "pam")]
mod pam;
// only the tests reach the callback without libpam.
#[cfg_attr(not(feature = "pam"), allow(dead_code))]
mod pam_conv;
#[cfg_attr(not(feature = "pam"), allow(dead_code))]
mod pam_sys;
pub mod passwd;

use self::converse::ConvError;

#[derive(Debug, Clone)]
pub struct BackendError {
    pub kind:    ErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn auth(message: impl Into<String>) -> BackendError {
        BackendError {
            kind:    ErrorKind::Authentication,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> BackendError {
        BackendError {
            kind:    ErrorKind::Internal,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for BackendError {}

// a failed conversation fails the authentication.
impl From<ConvError> for BackendError {
    fn from(e: ConvError) -> Self {
        BackendError::auth(format!("conversation failed: {}", e))
    }
}

/// What every backend can do.
pub trait Backend {
    /// Get ready. `user` is the pre-supplied user name, if any.
    fn start(&mut self, user: Option<&str>) -> Result<(), BackendError>;
    /// Check the credentials, asking for them as needed.
    fn authenticate(&mut self) -> Result<(), BackendError>;
    /// Set up credentials and start the session process.
    fn open_session(&mut self, session: &mut Session) -> Result<(), BackendError>;
    /// The user that was authenticated, as the backend knows it.
    fn user_name(&self) -> Option<String>;
}

/// PAM service for this kind of launch.
pub fn service_name<'a>(config: &'a Config, launch: &Launch) -> &'a str {
    if launch.autologin {
        &config.pam.autologin_service
    } else if launch.session.is_some() {
        &config.pam.service
    } else {
        &config.pam.check_service
    }
}

/// The backend this helper was built with.
#[cfg(feature = "pam")]
pub fn get(frontend: SharedFrontend, config: &Config, launch: &Launch) -> Box<dyn Backend> {
    let service = service_name(config, launch);
    debug!("backend::get: pam, service {}", service);
    Box::new(pam::PamBackend::new(frontend, service))
}

/// The backend this helper was built with.
#[cfg(not(feature = "pam"))]
pub fn get(frontend: SharedFrontend, config: &Config, launch: &Launch) -> Box<dyn Backend> {
    debug!(
        "backend::get: passwd (pam service {} not used)",
        service_name(config, launch)
    );
    let db = Box::new(passwd::ShadowDb);
    Box::new(passwd::PasswdBackend::new(frontend, db, launch.autologin))
}

// Look up the user and start the session as that user.
pub(crate) fn start_session(session: &mut Session, user: &str, base: &Environment) -> Result<(), BackendError> {
    let pwd = User::by_name(user).map_err(|e| BackendError::internal(format!("{}: {}", user, e)))?;
    session
        .start(&pwd, base)
        .map_err(|e| BackendError::internal(format!("{}: {}", session.program(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn launch(session: Option<&str>, autologin: bool) -> Launch {
        Launch {
            socket: PathBuf::from("/tmp/qauth.sock"),
            id: 1,
            session: session.map(|s| s.to_string()),
            user: None,
            autologin,
        }
    }

    #[test]
    fn test_service_name() {
        let config = Config::default();
        assert_eq!(service_name(&config, &launch(None, false)), "qauth-check");
        assert_eq!(service_name(&config, &launch(Some("/usr/bin/xterm"), false)), "qauth");
        assert_eq!(service_name(&config, &launch(Some("/usr/bin/xterm"), true)), "qauth-autologin");
    }
}
