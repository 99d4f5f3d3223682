//! Privilege-separated authentication, caller side.
//!
//! The actual authentication (PAM, or a passwd/shadow check) is done by
//! `qauth-helper`, a separate process that runs with the privileges that
//! takes. This crate launches the helper, answers its prompts, and
//! reports the outcome. It has no special privileges itself.
//!
//! Use it as follows:
//! ```no_run
//! # use qauth::{Auth, AuthHandler, AuthRequest, AuthServer};
//! struct Fixed;
//!
//! impl AuthHandler for Fixed {
//!     fn request(&mut self, req: &AuthRequest) {
//!         for idx in 0 .. req.len() {
//!             req.set_response(idx, b"secret");
//!         }
//!         req.done();
//!     }
//! }
//!
//! # async fn doc() -> std::io::Result<()> {
//! // call this once.
//! let server = AuthServer::start(AuthServer::default_path())?;
//!
//! // then once per authentication.
//! let mut auth = Auth::new().user("alice");
//! let code = auth.run(&server, &mut Fixed).await?;
//! println!("helper exited with {}", code);
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate log;

mod client;
mod environment;
mod prompt;
mod request;
mod server;

pub mod messages;
pub mod stream_channel;

pub use crate::client::{Auth, AuthHandler, DEFAULT_HELPER};
pub use crate::environment::Environment;
pub use crate::messages::{ErrorKind, InfoKind, Outcome, ProtoError};
pub use crate::prompt::{Prompt, PromptType, Request};
pub use crate::request::AuthRequest;
pub use crate::server::AuthServer;
