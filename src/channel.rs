// The helper's end of the connection to the caller.
//
// This is all old-fashioned blocking code. Every exchange is strictly
// send-then-wait; Error and Info are sent without waiting for anything.
//
use std::cell::RefCell;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use qauth::messages::{CallerMsg, HelperMsg, Message};
use qauth::stream_channel::{recv, send};
use qauth::{Environment, ErrorKind, InfoKind, ProtoError, Request};

/// What the backends and the orchestrator can ask of the caller.
pub trait Frontend {
    /// Report an error. Best effort.
    fn error(&mut self, message: &str, kind: ErrorKind);
    /// Report information. Best effort.
    fn info(&mut self, message: &str, kind: InfoKind);
    /// Send a request, wait for the filled-in request.
    fn request(&mut self, req: &Request) -> Result<Request, ProtoError>;
    /// Tell who was authenticated, get the caller's environment back.
    fn authenticated(&mut self, user: &str) -> Result<Environment, ProtoError>;
    /// Tell whether the session started, wait for the acknowledgment.
    fn session_status(&mut self, success: bool) -> Result<(), ProtoError>;
}

/// The frontend is shared between the orchestrator and the backend,
/// which calls it from inside the PAM conversation callback.
pub type SharedFrontend = Rc<RefCell<dyn Frontend>>;

pub struct Channel {
    stream: UnixStream,
}

impl Channel {
    /// Connect to the caller's socket and introduce ourselves.
    pub fn connect(path: impl AsRef<Path>, id: u64, timeout: Option<Duration>) -> Result<Channel, ProtoError> {
        let stream = UnixStream::connect(path.as_ref())?;
        stream.set_read_timeout(timeout)?;
        let mut chan = Channel::new(stream);
        chan.hello(id)?;
        debug!("Channel::connect: connected to {:?} as {}", path.as_ref(), id);
        Ok(chan)
    }

    pub fn new(stream: UnixStream) -> Channel {
        Channel { stream }
    }

    pub fn hello(&mut self, id: u64) -> Result<(), ProtoError> {
        send(&mut self.stream, &HelperMsg::Hello { id })
    }

    // one exchange: send, then wait for exactly one reply.
    fn exchange(&mut self, msg: &HelperMsg) -> Result<CallerMsg, ProtoError> {
        send(&mut self.stream, msg)?;
        match recv::<_, CallerMsg>(&mut self.stream)? {
            Some(reply) => Ok(reply),
            None => Err(ProtoError::Closed),
        }
    }

    fn notify(&mut self, msg: &HelperMsg) {
        if let Err(e) = send(&mut self.stream, msg) {
            warn!("Channel::notify: {:?}: {}", msg.kind(), e);
        }
    }
}

impl Frontend for Channel {
    fn error(&mut self, message: &str, kind: ErrorKind) {
        debug!("Channel::error: ({:?}) {}", kind, message);
        self.notify(&HelperMsg::Error {
            message: message.to_string(),
            kind,
        });
    }

    fn info(&mut self, message: &str, kind: InfoKind) {
        debug!("Channel::info: ({:?}) {}", kind, message);
        self.notify(&HelperMsg::Info {
            message: message.to_string(),
            kind,
        });
    }

    fn request(&mut self, req: &Request) -> Result<Request, ProtoError> {
        trace!("Channel::request: {:?}", req);
        match self.exchange(&HelperMsg::Request(req.clone()))? {
            CallerMsg::Request(filled) => Ok(filled),
            reply => Err(ProtoError::Unexpected(reply.kind())),
        }
    }

    fn authenticated(&mut self, user: &str) -> Result<Environment, ProtoError> {
        let msg = HelperMsg::Authenticated { user: user.to_string() };
        match self.exchange(&msg)? {
            CallerMsg::Environment(env) => Ok(env),
            reply => Err(ProtoError::Unexpected(reply.kind())),
        }
    }

    fn session_status(&mut self, success: bool) -> Result<(), ProtoError> {
        match self.exchange(&HelperMsg::SessionStatus { success })? {
            CallerMsg::SessionAck => Ok(()),
            reply => Err(ProtoError::Unexpected(reply.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qauth::messages::MsgKind;
    use qauth::{Prompt, PromptType};
    use std::thread;

    #[test]
    fn test_request_roundtrip() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let caller = thread::spawn(move || {
            match recv::<_, HelperMsg>(&mut theirs).unwrap() {
                Some(HelperMsg::Info { message, .. }) => assert_eq!(message, "hi"),
                m => panic!("unexpected {:?}", m),
            }
            let mut req = match recv::<_, HelperMsg>(&mut theirs).unwrap() {
                Some(HelperMsg::Request(req)) => req,
                m => panic!("unexpected {:?}", m),
            };
            req.prompts[0].set_response(b"secret");
            send(&mut theirs, &CallerMsg::Request(req)).unwrap();
        });

        let mut chan = Channel::new(ours);
        chan.info("hi", InfoKind::None);
        let req = Request::new(vec![Prompt::new(PromptType::LoginPassword, "Password:", true)]);
        let filled = chan.request(&req).unwrap();
        assert_eq!(filled.prompts[0].response, b"secret".to_vec());
        caller.join().unwrap();
    }

    #[test]
    fn test_wrong_reply() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let caller = thread::spawn(move || {
            let _ = recv::<_, HelperMsg>(&mut theirs).unwrap();
            send(&mut theirs, &CallerMsg::SessionAck).unwrap();
        });
        let mut chan = Channel::new(ours);
        match chan.authenticated("alice") {
            Err(ProtoError::Unexpected(MsgKind::SessionStatus)) => {},
            r => panic!("expected Unexpected, got {:?}", r),
        }
        caller.join().unwrap();
    }

    #[test]
    fn test_caller_gone() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let mut chan = Channel::new(ours);
        drop(theirs);
        // fire-and-forget does not care.
        chan.error("boom", ErrorKind::Internal);
        assert!(chan.session_status(true).is_err());
    }
}
