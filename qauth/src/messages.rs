//! Messages exchanged between the helper and the library.
//!
//! Every message starts with a 4-byte kind tag, followed by the fields of
//! that kind in a fixed order. Integers are fixed width, big-endian.
//!
//! | kind            | helper -> library     | library -> helper      |
//! |-----------------|-----------------------|------------------------|
//! | `Hello`         | session id            |                        |
//! | `Error`         | message, kind         |                        |
//! | `Info`          | message, kind         |                        |
//! | `Request`       | info, count, prompts  | info, count, prompts   |
//! | `Authenticated` | user name             | environment            |
//! | `SessionStatus` | success               | (empty acknowledgment) |
//!
//! Error and Info are not answered.
use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::io::{self, Cursor, Read};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::prompt::{Prompt, Request};

/// Upper bound for one encoded message.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

// fixed-width big-endian integers, and never read more than a message
// can hold.
fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_MESSAGE_SIZE as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgKind {
    Hello = 1,
    Error = 2,
    Info = 3,
    Request = 4,
    Authenticated = 5,
    SessionStatus = 6,
}

impl TryFrom<u32> for MsgKind {
    type Error = ProtoError;

    fn try_from(tag: u32) -> Result<MsgKind, ProtoError> {
        let kind = match tag {
            1 => MsgKind::Hello,
            2 => MsgKind::Error,
            3 => MsgKind::Info,
            4 => MsgKind::Request,
            5 => MsgKind::Authenticated,
            6 => MsgKind::SessionStatus,
            n => return Err(ProtoError::UnknownTag(n)),
        };
        Ok(kind)
    }
}

/// Kind of error reported by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    None,
    Unknown,
    Authentication,
    Internal,
}

/// Kind of information reported by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoKind {
    None,
    Unknown,
    PassChangeRequired,
}

/// Exit status of the helper.
///
/// When a session was started, the helper exits with the session's exit
/// code instead, which can be anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    AuthSuccess = 0,
    AuthError = 1,
    SessionError = 2,
    OtherError = 3,
}

impl Outcome {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Outcome> {
        match code {
            0 => Some(Outcome::AuthSuccess),
            1 => Some(Outcome::AuthError),
            2 => Some(Outcome::SessionError),
            3 => Some(Outcome::OtherError),
            _ => None,
        }
    }
}

/// Protocol error.
///
/// Any of these ends the exchange. Nothing is retried.
#[derive(Debug)]
pub enum ProtoError {
    Io(io::Error),
    UnknownTag(u32),
    Unexpected(MsgKind),
    Corrupt(String),
    TooLarge(usize),
    Closed,
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtoError::Io(e) => write!(f, "i/o error: {}", e),
            ProtoError::UnknownTag(n) => write!(f, "unknown message tag {}", n),
            ProtoError::Unexpected(k) => write!(f, "unexpected {:?} message", k),
            ProtoError::Corrupt(s) => write!(f, "corrupt message: {}", s),
            ProtoError::TooLarge(n) => write!(f, "message too large ({} bytes)", n),
            ProtoError::Closed => f.write_str("connection closed"),
        }
    }
}

impl Error for ProtoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtoError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ProtoError {
    fn from(e: io::Error) -> Self {
        ProtoError::Io(e)
    }
}

impl From<bincode::Error> for ProtoError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(e) if e.kind() != io::ErrorKind::UnexpectedEof => ProtoError::Io(e),
            e => ProtoError::Corrupt(e.to_string()),
        }
    }
}

impl From<ProtoError> for io::Error {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::Io(e) => e,
            ProtoError::Closed => io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
            e => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        }
    }
}

/// Sent by the helper.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperMsg {
    Hello { id: u64 },
    Error { message: String, kind: ErrorKind },
    Info { message: String, kind: InfoKind },
    Request(Request),
    Authenticated { user: String },
    SessionStatus { success: bool },
}

/// Sent by the library, in reply to the helper.
#[derive(Debug, Clone, PartialEq)]
pub enum CallerMsg {
    /// The filled-in request.
    Request(Request),
    /// Reply to `Authenticated`: environment for the session.
    Environment(Environment),
    /// Reply to `SessionStatus`.
    SessionAck,
}

/// A message that can be put on the wire.
pub trait Message: Sized {
    fn kind(&self) -> MsgKind;
    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), ProtoError>;
    fn decode_body(kind: MsgKind, rd: &mut Cursor<&[u8]>) -> Result<Self, ProtoError>;
}

fn put<T: Serialize + ?Sized>(buf: &mut Vec<u8>, value: &T) -> Result<(), ProtoError> {
    options().serialize_into(buf, value)?;
    Ok(())
}

fn get<T: DeserializeOwned>(rd: &mut Cursor<&[u8]>) -> Result<T, ProtoError> {
    Ok(options().deserialize_from(rd)?)
}

fn put_request(buf: &mut Vec<u8>, req: &Request) -> Result<(), ProtoError> {
    put(buf, &req.info)?;
    put(buf, &(req.prompts.len() as u32))?;
    for p in &req.prompts {
        put(buf, p)?;
    }
    Ok(())
}

fn get_request(rd: &mut Cursor<&[u8]>) -> Result<Request, ProtoError> {
    let info: String = get(rd)?;
    let count: u32 = get(rd)?;
    let mut prompts = Vec::new();
    for _ in 0..count {
        match get::<Prompt>(rd) {
            Ok(p) => prompts.push(p),
            Err(_) => break,
        }
    }
    if prompts.len() != count as usize {
        return Err(ProtoError::Corrupt(format!(
            "request announces {} prompts, decoded {}",
            count,
            prompts.len()
        )));
    }
    Ok(Request { info, prompts })
}

impl Message for HelperMsg {
    fn kind(&self) -> MsgKind {
        match self {
            HelperMsg::Hello { .. } => MsgKind::Hello,
            HelperMsg::Error { .. } => MsgKind::Error,
            HelperMsg::Info { .. } => MsgKind::Info,
            HelperMsg::Request(..) => MsgKind::Request,
            HelperMsg::Authenticated { .. } => MsgKind::Authenticated,
            HelperMsg::SessionStatus { .. } => MsgKind::SessionStatus,
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), ProtoError> {
        match self {
            HelperMsg::Hello { id } => put(buf, id),
            HelperMsg::Error { message, kind } => {
                put(buf, message)?;
                put(buf, kind)
            },
            HelperMsg::Info { message, kind } => {
                put(buf, message)?;
                put(buf, kind)
            },
            HelperMsg::Request(req) => put_request(buf, req),
            HelperMsg::Authenticated { user } => put(buf, user),
            HelperMsg::SessionStatus { success } => put(buf, success),
        }
    }

    fn decode_body(kind: MsgKind, rd: &mut Cursor<&[u8]>) -> Result<HelperMsg, ProtoError> {
        let msg = match kind {
            MsgKind::Hello => HelperMsg::Hello { id: get(rd)? },
            MsgKind::Error => HelperMsg::Error {
                message: get(rd)?,
                kind:    get(rd)?,
            },
            MsgKind::Info => HelperMsg::Info {
                message: get(rd)?,
                kind:    get(rd)?,
            },
            MsgKind::Request => HelperMsg::Request(get_request(rd)?),
            MsgKind::Authenticated => HelperMsg::Authenticated { user: get(rd)? },
            MsgKind::SessionStatus => HelperMsg::SessionStatus { success: get(rd)? },
        };
        Ok(msg)
    }
}

impl Message for CallerMsg {
    fn kind(&self) -> MsgKind {
        match self {
            CallerMsg::Request(..) => MsgKind::Request,
            CallerMsg::Environment(..) => MsgKind::Authenticated,
            CallerMsg::SessionAck => MsgKind::SessionStatus,
        }
    }

    fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), ProtoError> {
        match self {
            CallerMsg::Request(req) => put_request(buf, req),
            CallerMsg::Environment(env) => put(buf, env),
            CallerMsg::SessionAck => Ok(()),
        }
    }

    fn decode_body(kind: MsgKind, rd: &mut Cursor<&[u8]>) -> Result<CallerMsg, ProtoError> {
        match kind {
            MsgKind::Request => Ok(CallerMsg::Request(get_request(rd)?)),
            MsgKind::Authenticated => Ok(CallerMsg::Environment(get(rd)?)),
            MsgKind::SessionStatus => Ok(CallerMsg::SessionAck),
            kind => Err(ProtoError::Unexpected(kind)),
        }
    }
}

/// Encode a message: tag, then body.
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::with_capacity(64);
    put(&mut buf, &(msg.kind() as u32))?;
    msg.encode_body(&mut buf)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ProtoError::TooLarge(buf.len()));
    }
    Ok(buf)
}

/// Decode a message. The whole buffer must be consumed.
pub fn decode<M: Message>(data: &[u8]) -> Result<M, ProtoError> {
    if data.len() < 4 {
        return Err(ProtoError::Corrupt(format!("short message ({} bytes)", data.len())));
    }
    let mut rd = Cursor::new(data);
    let tag: u32 = get(&mut rd)?;
    let kind = MsgKind::try_from(tag)?;
    let msg = M::decode_body(kind, &mut rd)?;
    let mut rest = [0u8; 1];
    if rd.read(&mut rest)? != 0 {
        return Err(ProtoError::Corrupt(format!("trailing bytes after {:?} message", kind)));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptType;

    fn login_request() -> Request {
        Request::with_info("Changing password for alice", vec![
            Prompt::new(PromptType::LoginUser, "login:", false),
            Prompt::new(PromptType::LoginPassword, "Password:", true),
        ])
    }

    #[test]
    fn test_request_roundtrip() {
        let req = login_request();
        let data = encode(&HelperMsg::Request(req.clone())).unwrap();
        match decode::<HelperMsg>(&data).unwrap() {
            HelperMsg::Request(r) => {
                assert_eq!(r, req);
                assert_eq!(r.info, req.info);
            },
            m => panic!("unexpected {:?}", m),
        }
    }

    #[test]
    fn test_filled_request_roundtrip() {
        let mut req = login_request();
        req.prompts[0].set_response(b"alice");
        req.prompts[1].set_response(b"secret");
        let data = encode(&CallerMsg::Request(req.clone())).unwrap();
        match decode::<CallerMsg>(&data).unwrap() {
            CallerMsg::Request(r) => {
                assert_eq!(r, req);
                assert_eq!(r.prompts[1].response, b"secret".to_vec());
            },
            m => panic!("unexpected {:?}", m),
        }
    }

    #[test]
    fn test_outgoing_projection_is_stable() {
        let mut req = login_request();
        req.prompts[1].set_response(b"secret");
        let sent = req.without_responses();
        let once = encode(&HelperMsg::Request(sent.clone())).unwrap();
        let back = match decode::<HelperMsg>(&once).unwrap() {
            HelperMsg::Request(r) => r,
            m => panic!("unexpected {:?}", m),
        };
        assert!(back.prompts.iter().all(|p| !p.has_response()));
        let twice = encode(&HelperMsg::Request(back.without_responses())).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_tag_layout() {
        let data = encode(&HelperMsg::Hello { id: 7 }).unwrap();
        assert_eq!(data, vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(decode::<HelperMsg>(&data).unwrap(), HelperMsg::Hello { id: 7 });
    }

    #[test]
    fn test_unknown_tag() {
        let data = vec![0, 0, 0, 9, 0, 0, 0, 0];
        match decode::<HelperMsg>(&data) {
            Err(ProtoError::UnknownTag(9)) => {},
            r => panic!("expected UnknownTag, got {:?}", r),
        }
        let data = vec![0, 0, 0, 0];
        match decode::<HelperMsg>(&data) {
            Err(ProtoError::UnknownTag(0)) => {},
            r => panic!("expected UnknownTag, got {:?}", r),
        }
    }

    #[test]
    fn test_count_mismatch_is_corrupt() {
        let mut data = encode(&HelperMsg::Request(login_request())).unwrap();
        // bump the prompt count: tag (4) + info length (8) + info bytes.
        let pos = 4 + 8 + login_request().info.len() + 3;
        data[pos] += 1;
        match decode::<HelperMsg>(&data) {
            Err(ProtoError::Corrupt(_)) => {},
            r => panic!("expected Corrupt, got {:?}", r),
        }
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut data = encode(&CallerMsg::SessionAck).unwrap();
        data.push(0);
        match decode::<CallerMsg>(&data) {
            Err(ProtoError::Corrupt(_)) => {},
            r => panic!("expected Corrupt, got {:?}", r),
        }
    }

    #[test]
    fn test_direction_specific_kinds() {
        let data = encode(&HelperMsg::Hello { id: 1 }).unwrap();
        match decode::<CallerMsg>(&data) {
            Err(ProtoError::Unexpected(MsgKind::Hello)) => {},
            r => panic!("expected Unexpected, got {:?}", r),
        }

        let mut env = Environment::new();
        env.insert("LANG", "C");
        let data = encode(&CallerMsg::Environment(env.clone())).unwrap();
        assert_eq!(decode::<CallerMsg>(&data).unwrap(), CallerMsg::Environment(env));
    }

    #[test]
    fn test_error_and_info() {
        let msg = HelperMsg::Error {
            message: "Authentication failure".to_string(),
            kind:    ErrorKind::Authentication,
        };
        let data = encode(&msg).unwrap();
        assert_eq!(decode::<HelperMsg>(&data).unwrap(), msg);

        let msg = HelperMsg::Info {
            message: "Password expired".to_string(),
            kind:    InfoKind::PassChangeRequired,
        };
        let data = encode(&msg).unwrap();
        assert_eq!(decode::<HelperMsg>(&data).unwrap(), msg);
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::AuthSuccess.code(), 0);
        assert_eq!(Outcome::OtherError.code(), 3);
        assert_eq!(Outcome::from_code(2), Some(Outcome::SessionError));
        assert_eq!(Outcome::from_code(7), None);
    }
}
