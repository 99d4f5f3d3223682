//
// Check a password, or start a session, from the command line.
//
// checkpass [-u USER] [-s "COMMAND ARGS"] [-H HELPER] [-a] [-v]
//
#[macro_use]
extern crate clap;

use std::io::{self, Write};

use qauth::{Auth, AuthHandler, AuthRequest, AuthServer, ErrorKind, InfoKind, Outcome};

fn prompt(s: &str) -> io::Result<String> {
    print!("{} ", s.trim_end());
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(&['\r', '\n'][..]).to_string())
}

struct Terminal;

impl AuthHandler for Terminal {
    fn request(&mut self, req: &AuthRequest) {
        let info = req.info();
        if !info.is_empty() {
            println!("{}", info);
        }
        for (idx, p) in req.prompts().iter().enumerate() {
            match prompt(&p.message) {
                Ok(answer) => {
                    req.set_response(idx, answer.as_bytes());
                },
                Err(e) => {
                    eprintln!("checkpass: {}", e);
                    break;
                },
            }
        }
        req.done();
    }

    fn error(&mut self, message: &str, _kind: ErrorKind) {
        eprintln!("{}", message);
    }

    fn info(&mut self, message: &str, _kind: InfoKind) {
        println!("{}", message);
    }

    fn authentication(&mut self, user: &str, success: bool) {
        if success {
            println!("authenticated as {}", user);
        }
    }

    fn session(&mut self, success: bool) {
        if !success {
            eprintln!("checkpass: failed to start session");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = clap_app!(checkpass =>
        (version: "0.1")
        (@arg USER: -u --user +takes_value "user to authenticate")
        (@arg SESSION: -s --session +takes_value "session to start after authentication")
        (@arg HELPER: -H --helper +takes_value "path of qauth-helper")
        (@arg AUTOLOGIN: -a --autologin "log in without a password")
        (@arg VERBOSE: -v --verbose "debug logging in the helper")
    )
    .get_matches();

    let mut auth = Auth::new()
        .autologin(matches.is_present("AUTOLOGIN"))
        .verbose(matches.is_present("VERBOSE"));
    if let Some(user) = matches.value_of("USER") {
        auth = auth.user(user);
    }
    if let Some(session) = matches.value_of("SESSION") {
        auth = auth.session(session);
    }
    if let Some(helper) = matches.value_of("HELPER") {
        auth = auth.helper(helper);
    }
    if let Ok(display) = std::env::var("DISPLAY") {
        auth.insert_environment("DISPLAY", display);
    }

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let code = rt.block_on(async move {
        let server = AuthServer::start(AuthServer::default_path())?;
        auth.run(&server, &mut Terminal).await
    })?;

    match Outcome::from_code(code) {
        Some(Outcome::AuthSuccess) => println!("ok"),
        Some(Outcome::AuthError) => println!("authentication failed"),
        Some(outcome) => println!("failed: {:?}", outcome),
        None => println!("session exited with status {}", code),
    }
    std::process::exit(code);
}
