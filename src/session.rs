// The session process.
//
// After authentication the helper can start a program (a desktop
// session, a shell) as the authenticated user, and waits for it.
//
use std::ffi::CString;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command};

use qauth::Environment;

use crate::suid;
use crate::unixuser::User;

// set from the user database; the caller cannot override these.
const IDENTITY_VARS: &[&str] = &["HOME", "PWD", "SHELL", "USER", "LOGNAME"];

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Split a command line into words. Double or single quotes group
/// words; a backslash escapes the next character.
pub fn split_command(cmdline: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = cmdline.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some(n) = chars.next() {
                    word.push(n);
                }
                in_word = true;
            },
            (Some(_), c) => word.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_word = true;
            },
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::replace(&mut word, String::new()));
                    in_word = false;
                }
            },
            (None, c) => {
                word.push(c);
                in_word = true;
            },
        }
    }
    if in_word {
        words.push(word);
    }
    words
}

/// The session environment: backend values, then the user's identity,
/// then the caller's variables on top.
pub fn build_environment(base: &Environment, user: &User, overrides: &Environment) -> Environment {
    let mut env = base.clone();

    let home = user.dir.to_string_lossy().into_owned();
    let shell = user.shell.to_string_lossy().into_owned();
    let identity = [
        ("HOME", home.as_str()),
        ("PWD", home.as_str()),
        ("SHELL", shell.as_str()),
        ("USER", user.name.as_str()),
        ("LOGNAME", user.name.as_str()),
    ];
    for (key, value) in identity.iter() {
        if !env.contains_key(key) {
            env.insert(*key, *value);
        }
    }
    if !env.contains_key("PATH") {
        env.insert("PATH", DEFAULT_PATH);
    }

    env.merge(overrides, IDENTITY_VARS);

    if env.contains_key("DISPLAY") && !env.contains_key("XAUTHORITY") {
        let xauth = user.dir.join(".Xauthority");
        env.insert("XAUTHORITY", xauth.to_string_lossy().into_owned());
    }
    env
}

pub struct Session {
    command:   Vec<String>,
    overrides: Environment,
    child:     Option<Child>,
}

impl Session {
    /// A session for `cmdline`, with the caller's environment variables.
    pub fn new(cmdline: &str, overrides: Environment) -> io::Result<Session> {
        let command = split_command(cmdline);
        if command.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty session command"));
        }
        Ok(Session {
            command,
            overrides,
            child: None,
        })
    }

    pub fn program(&self) -> &str {
        &self.command[0]
    }

    /// The X display the caller runs on, if any.
    pub fn display(&self) -> Option<&str> {
        self.overrides.get("DISPLAY")
    }

    /// Start the session as `user`.
    ///
    /// When we are root the child switches to the user; otherwise the
    /// user has to be us.
    pub fn start(&mut self, user: &User, base: &Environment) -> io::Result<()> {
        let env = build_environment(base, user, &self.overrides);

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).env_clear().envs(env.iter());
        if user.dir.is_dir() {
            cmd.current_dir(&user.dir);
        } else {
            cmd.current_dir(Path::new("/"));
        }

        if suid::is_root() {
            let (uid, gid) = (user.uid, user.gid);
            let name = CString::new(user.name.as_str())?;
            unsafe {
                cmd.pre_exec(move || suid::switch_ugid(uid, gid, &name));
            }
        } else if user.uid != suid::current_uid() {
            let msg = format!("cannot start a session for {} without root privileges", user.name);
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, msg));
        }

        let child = cmd.spawn()?;
        info!(
            "Session::start: {} started for {} (pid {})",
            self.command[0],
            user.name,
            child.id()
        );
        self.child = Some(child);
        Ok(())
    }

    /// Wait for the session to exit. Killed by a signal gives 128 + signal.
    pub fn wait(&mut self) -> io::Result<i32> {
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return Err(io::Error::new(io::ErrorKind::Other, "session not started")),
        };
        let status = child.wait()?;
        self.child = None;
        let code = match status.code() {
            Some(code) => code,
            None => 128 + status.signal().unwrap_or(0),
        };
        debug!("Session::wait: exit status {}", code);
        Ok(code)
    }

    /// Kill a running session and reap it.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
