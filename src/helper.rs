// The orchestrator.
//
// start -> authenticate -> (session) -> exit code. Any failing step is
// reported to the caller and ends the run; nothing is retried here.
//
use std::path::PathBuf;

use qauth::Outcome;

use crate::backend::{Backend, BackendError};
use crate::channel::SharedFrontend;
use crate::session::Session;

/// What the helper was asked to do.
#[derive(Debug, Clone)]
pub struct Launch {
    pub socket:    PathBuf,
    pub id:        u64,
    pub session:   Option<String>,
    pub user:      Option<String>,
    pub autologin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Started,
    Authenticated,
    SessionOpened,
    Done,
    Failed,
}

pub struct Helper {
    frontend: SharedFrontend,
    backend:  Box<dyn Backend>,
    launch:   Launch,
    state:    State,
}

impl Helper {
    pub fn new(frontend: SharedFrontend, backend: Box<dyn Backend>, launch: Launch) -> Helper {
        Helper {
            frontend,
            backend,
            launch,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn transition(&mut self, to: State) {
        debug!("Helper::transition: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn fail(&mut self, err: &BackendError, outcome: Outcome) -> i32 {
        warn!("Helper::run: {:?}: {}", self.state, err);
        self.frontend.borrow_mut().error(&err.message, err.kind);
        self.transition(State::Failed);
        outcome.code()
    }

    /// Run to the end. Returns the exit code for the process.
    pub fn run(&mut self) -> i32 {
        let user = self.launch.user.clone();
        if let Err(e) = self.backend.start(user.as_ref().map(|s| s.as_str())) {
            return self.fail(&e, Outcome::AuthError);
        }
        self.transition(State::Started);

        if let Err(e) = self.backend.authenticate() {
            return self.fail(&e, Outcome::AuthError);
        }
        let user = match self.backend.user_name() {
            Some(user) => user,
            None => {
                let e = BackendError::internal("authenticated, but no user name");
                return self.fail(&e, Outcome::AuthError);
            },
        };
        info!("Helper::run: authenticated {}", user);

        let reply = self.frontend.borrow_mut().authenticated(&user);
        let env = match reply {
            Ok(env) => env,
            Err(e) => {
                warn!("Helper::run: reporting authentication: {}", e);
                self.transition(State::Failed);
                return Outcome::OtherError.code();
            },
        };
        self.transition(State::Authenticated);

        let cmdline = match self.launch.session.clone() {
            Some(cmdline) => cmdline,
            None => {
                self.transition(State::Done);
                return Outcome::AuthSuccess.code();
            },
        };

        let mut session = match Session::new(&cmdline, env) {
            Ok(session) => session,
            Err(e) => {
                let e = BackendError::internal(format!("{}: {}", cmdline, e));
                let _ = self.frontend.borrow_mut().session_status(false);
                return self.fail(&e, Outcome::SessionError);
            },
        };
        let opened = self.backend.open_session(&mut session);
        if let Err(ref e) = opened {
            warn!("Helper::run: open session: {}", e);
            self.frontend.borrow_mut().error(&e.message, e.kind);
        }

        let status = self.frontend.borrow_mut().session_status(opened.is_ok());
        if let Err(e) = status {
            warn!("Helper::run: reporting session status: {}", e);
            session.terminate();
            self.transition(State::Failed);
            return Outcome::OtherError.code();
        }
        if opened.is_err() {
            self.transition(State::Failed);
            return Outcome::SessionError.code();
        }
        self.transition(State::SessionOpened);

        match session.wait() {
            Ok(code) => {
                info!("Helper::run: session exited with {}", code);
                self.transition(State::Done);
                code
            },
            Err(e) => {
                let e = BackendError::internal(format!("waiting for session: {}", e));
                self.fail(&e, Outcome::OtherError)
            },
        }
    }
}
