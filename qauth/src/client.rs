// Client part: launches the helper and answers it.
//
// The helper runs as a separate (privileged) process. It connects back
// to the AuthServer's socket, and from then on it asks, we answer. We
// never know the password rules or the session details ourselves; all
// we see are prompts, messages, and in the end an exit code.
//
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::net::UnixStream;
use tokio::process::{Child, Command};

use crate::environment::Environment;
use crate::messages::{CallerMsg, ErrorKind, HelperMsg, InfoKind, MsgKind, Outcome, ProtoError};
use crate::request::AuthRequest;
use crate::server::AuthServer;
use crate::stream_channel::{recv_async, send_async};

/// Where the helper is installed.
pub const DEFAULT_HELPER: &str = "/usr/lib/qauth/qauth-helper";

/// Receives everything the helper has to say.
///
/// Only `request` has to be implemented. It must eventually call
/// `AuthRequest::done`, or fill in every prompt when the request is in
/// automatic mode. It may do that later, from another task.
pub trait AuthHandler {
    fn request(&mut self, request: &AuthRequest);

    fn error(&mut self, message: &str, kind: ErrorKind) {
        warn!("Auth: error ({:?}): {}", kind, message);
    }

    fn info(&mut self, message: &str, kind: InfoKind) {
        info!("Auth: info ({:?}): {}", kind, message);
    }

    fn authentication(&mut self, _user: &str, _success: bool) {}

    fn session(&mut self, _success: bool) {}

    fn finished(&mut self, _code: i32) {}
}

/// One authentication, and optionally a session.
pub struct Auth {
    helper:      PathBuf,
    user:        Option<String>,
    session:     Option<String>,
    autologin:   bool,
    verbose:     bool,
    environment: Environment,
    request:     AuthRequest,
    auth_user:   Option<String>,
}

impl Auth {
    pub fn new() -> Auth {
        Auth {
            helper:      PathBuf::from(DEFAULT_HELPER),
            user:        None,
            session:     None,
            autologin:   false,
            verbose:     false,
            environment: Environment::new(),
            request:     AuthRequest::new(),
            auth_user:   None,
        }
    }

    pub fn helper(mut self, path: impl AsRef<Path>) -> Auth {
        self.helper = path.as_ref().to_path_buf();
        self
    }

    /// Pre-supply the user name. The helper will then only ask for
    /// the password.
    pub fn user(mut self, user: impl Into<String>) -> Auth {
        self.user = Some(user.into());
        self
    }

    /// Command line of the session to start after authentication.
    pub fn session(mut self, cmd: impl Into<String>) -> Auth {
        self.session = Some(cmd.into());
        self
    }

    pub fn autologin(mut self, autologin: bool) -> Auth {
        self.autologin = autologin;
        self
    }

    /// Run the helper with debug logging.
    pub fn verbose(mut self, verbose: bool) -> Auth {
        self.verbose = verbose;
        self
    }

    /// Add a variable to the session environment. Identity variables
    /// (HOME, USER and the like) set by the helper take precedence.
    pub fn insert_environment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(key, value);
    }

    /// The request controller handed to `AuthHandler::request`.
    pub fn request(&self) -> &AuthRequest {
        &self.request
    }

    /// The user name the helper authenticated, if it got that far.
    pub fn authenticated_user(&self) -> Option<&str> {
        self.auth_user.as_ref().map(|s| s.as_str())
    }

    fn command(&self, server: &AuthServer, id: u64) -> Command {
        let mut cmd = Command::new(&self.helper);
        cmd.arg("--socket").arg(server.path());
        cmd.arg("--id").arg(id.to_string());
        if let Some(ref session) = self.session {
            cmd.arg("--start").arg(session);
        }
        if let Some(ref user) = self.user {
            cmd.arg("--user").arg(user);
        }
        if self.autologin {
            cmd.arg("--autologin");
        }
        if self.verbose {
            cmd.env("RUST_LOG", "debug");
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Launch the helper and answer it until it exits.
    ///
    /// Returns the helper's exit code: an `Outcome` code, or the exit
    /// code of the session if one was started.
    pub async fn run<H: AuthHandler>(&mut self, server: &AuthServer, handler: &mut H) -> io::Result<i32> {
        self.auth_user = None;
        let (id, conn_rx) = server.register();
        let mut child = match self.command(server, id).spawn() {
            Ok(child) => child,
            Err(e) => {
                server.unregister(id);
                error!("Auth::run: {:?}: {}", self.helper, e);
                return Err(e);
            },
        };
        debug!("Auth::run: started helper {:?} with id {}", self.helper, id);

        // the helper either connects, or exits without ever doing so.
        let conn = tokio::select! {
            conn = conn_rx => conn.ok(),
            status = child.wait() => {
                server.unregister(id);
                let code = exit_code(status?);
                debug!("Auth::run: helper exited before connecting: {}", code);
                return Ok(self.finish(handler, code));
            },
        };
        let mut conn = match conn {
            Some(conn) => conn,
            None => {
                let _ = child.start_kill();
                return Err(io::Error::new(io::ErrorKind::Other, "auth server stopped"));
            },
        };

        if let Err(e) = self.converse(&mut conn, &mut child, handler).await {
            warn!("Auth::run: {}", e);
            handler.error(&e.to_string(), ErrorKind::Internal);
            let _ = child.start_kill();
        }
        drop(conn);

        let code = exit_code(child.wait().await?);
        debug!("Auth::run: helper exited: {}", code);
        Ok(self.finish(handler, code))
    }

    fn finish<H: AuthHandler>(&mut self, handler: &mut H, code: i32) -> i32 {
        if code == Outcome::AuthError.code() && self.auth_user.is_none() {
            let user = self.user.clone().unwrap_or_default();
            handler.authentication(&user, false);
        }
        handler.finished(code);
        code
    }

    async fn converse<H: AuthHandler>(
        &mut self,
        conn: &mut UnixStream,
        child: &mut Child,
        handler: &mut H,
    ) -> Result<(), ProtoError>
    {
        loop {
            let msg: HelperMsg = match recv_async(conn).await? {
                Some(msg) => msg,
                None => {
                    trace!("Auth::converse: helper closed the connection");
                    return Ok(());
                },
            };
            match msg {
                HelperMsg::Hello { .. } => return Err(ProtoError::Unexpected(MsgKind::Hello)),
                HelperMsg::Error { message, kind } => handler.error(&message, kind),
                HelperMsg::Info { message, kind } => handler.info(&message, kind),
                HelperMsg::Request(req) => {
                    if !req.valid() {
                        return Err(ProtoError::Corrupt("empty request".to_string()));
                    }
                    let done_rx = self.request.set_request(&req);
                    handler.request(&self.request);
                    let filled = tokio::select! {
                        filled = done_rx => filled.map_err(|_| ProtoError::Closed)?,
                        _ = child.wait() => return Err(ProtoError::Closed),
                    };
                    send_async(conn, &CallerMsg::Request(filled)).await?;
                },
                HelperMsg::Authenticated { user } => {
                    debug!("Auth::converse: authenticated as {}", user);
                    handler.authentication(&user, true);
                    self.auth_user = Some(user);
                    send_async(conn, &CallerMsg::Environment(self.environment.clone())).await?;
                },
                HelperMsg::SessionStatus { success } => {
                    debug!("Auth::converse: session started: {}", success);
                    handler.session(success);
                    send_async(conn, &CallerMsg::SessionAck).await?;
                },
            }
        }
    }
}

impl Default for Auth {
    fn default() -> Auth {
        Auth::new()
    }
}

// killed by a signal: 128 + signal, like the shell does.
fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
