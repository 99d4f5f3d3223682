//
//  qauth-helper.
//
//  Started by the caller library, never by hand. Connects back to the
//  caller's socket, authenticates a user through a backend, optionally
//  runs a session as that user, and exits with the outcome.
//
#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod backend;
mod channel;
mod config;
mod helper;
mod session;
mod suid;
mod unixuser;

use std::cell::RefCell;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;

use qauth::Outcome;

use crate::channel::{Channel, SharedFrontend};
use crate::helper::{Helper, Launch};

const NOT_MANUAL: &str = "This application is not supposed to be executed manually";

struct Args {
    launch: Launch,
    config: PathBuf,
}

fn parse_args<I, T>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = clap_app!(qauth_helper =>
        (version: "0.1")
        (@arg SOCKET: --socket +takes_value "socket of the caller")
        (@arg ID: --id +takes_value "id handed out by the caller")
        (@arg START: --start +takes_value "session to start after authentication")
        (@arg USER: --user +takes_value "user to authenticate")
        (@arg AUTOLOGIN: --autologin "log in without credentials")
        (@arg CONFIG: -c --config +takes_value "configuration file (/etc/qauth/helper.toml)")
    )
    .get_matches_from_safe(args)
    .map_err(|e| e.message)?;

    let socket = match matches.value_of_os("SOCKET") {
        Some(s) if !s.is_empty() => PathBuf::from(s),
        _ => return Err(NOT_MANUAL.to_string()),
    };
    let id = match matches.value_of("ID").and_then(|s| s.parse::<u64>().ok()) {
        Some(id) if id > 0 => id,
        _ => return Err(NOT_MANUAL.to_string()),
    };

    let launch = Launch {
        socket,
        id,
        session: matches.value_of("START").filter(|s| !s.is_empty()).map(|s| s.to_string()),
        user: matches.value_of("USER").filter(|s| !s.is_empty()).map(|s| s.to_string()),
        autologin: matches.is_present("AUTOLOGIN"),
    };
    let config = PathBuf::from(matches.value_of("CONFIG").unwrap_or(config::DEFAULT_CONFIG));
    Ok(Args { launch, config })
}

fn main() {
    env_logger::init();

    let args = match parse_args(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(Outcome::OtherError.code());
        },
    };

    let cfg = args.config.to_string_lossy().into_owned();
    let config = match config::read_or_default(&args.config).and_then(|c| config::check(&cfg, &c).map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("qauth-helper: {}: {}", cfg, e);
            process::exit(Outcome::OtherError.code());
        },
    };

    let launch = args.launch;
    let chan = match Channel::connect(&launch.socket, launch.id, config.helper.read_timeout()) {
        Ok(chan) => chan,
        Err(e) => {
            error!("qauth-helper: {:?}: {}", launch.socket, e);
            process::exit(Outcome::OtherError.code());
        },
    };
    info!("qauth-helper: started, id {}, user {:?}, session {:?}", launch.id, launch.user, launch.session);

    let frontend: SharedFrontend = Rc::new(RefCell::new(chan));
    let backend = backend::get(frontend.clone(), &config, &launch);
    let code = {
        let mut helper = Helper::new(frontend, backend, launch);
        let code = helper.run();
        debug!("qauth-helper: finished in state {:?}", helper.state());
        code
    };
    // the helper (and with it the backend) is gone; PAM has been shut down.
    debug!("qauth-helper: exit {}", code);
    process::exit(code);
}
