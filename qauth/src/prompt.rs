//
// Prompt and Request value types.
//
// These travel between the helper and the library. A Prompt may hold a
// password in `response`, so every place that lets go of one overwrites
// the bytes first.
//
use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// What a prompt is asking for.
///
/// The numeric codes are what goes over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum PromptType {
    None,
    Unknown,
    ChangeCurrent,
    ChangeNew,
    ChangeRepeat,
    LoginUser,
    LoginPassword,
}

impl Default for PromptType {
    fn default() -> PromptType {
        PromptType::None
    }
}

impl From<PromptType> for u32 {
    fn from(t: PromptType) -> u32 {
        match t {
            PromptType::None => 0x0000,
            PromptType::Unknown => 0x0001,
            PromptType::ChangeCurrent => 0x0010,
            PromptType::ChangeNew => 0x0011,
            PromptType::ChangeRepeat => 0x0012,
            PromptType::LoginUser => 0x0080,
            PromptType::LoginPassword => 0x0081,
        }
    }
}

impl TryFrom<u32> for PromptType {
    type Error = String;

    fn try_from(code: u32) -> Result<PromptType, String> {
        let t = match code {
            0x0000 => PromptType::None,
            0x0001 => PromptType::Unknown,
            0x0010 => PromptType::ChangeCurrent,
            0x0011 => PromptType::ChangeNew,
            0x0012 => PromptType::ChangeRepeat,
            0x0080 => PromptType::LoginUser,
            0x0081 => PromptType::LoginPassword,
            _ => return Err(format!("unknown prompt type 0x{:04x}", code)),
        };
        Ok(t)
    }
}

/// One input field the backend wants filled in.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub kind:     PromptType,
    pub message:  String,
    pub hidden:   bool,
    pub response: Vec<u8>,
}

impl Prompt {
    pub fn new(kind: PromptType, message: impl Into<String>, hidden: bool) -> Prompt {
        Prompt {
            kind,
            message: message.into(),
            hidden,
            response: Vec::new(),
        }
    }

    /// A prompt is worth sending if it says what it wants, or if it
    /// already carries an answer.
    pub fn valid(&self) -> bool {
        (self.kind != PromptType::None && !self.message.is_empty()) || !self.response.is_empty()
    }

    pub fn has_response(&self) -> bool {
        !self.response.is_empty()
    }

    /// Replace the response. The old bytes are wiped first.
    pub fn set_response(&mut self, response: &[u8]) {
        self.response.zeroize();
        self.response.extend_from_slice(response);
    }

    /// Same field: type, message and echo flag match. The response is
    /// not looked at.
    pub fn same_field(&self, other: &Prompt) -> bool {
        self.kind == other.kind && self.message == other.message && self.hidden == other.hidden
    }

    /// A copy of the field description without the answer.
    pub fn without_response(&self) -> Prompt {
        Prompt::new(self.kind, self.message.clone(), self.hidden)
    }

    pub fn clear(&mut self) {
        self.kind = PromptType::None;
        self.response.zeroize();
        self.message.clear();
        self.hidden = false;
    }
}

impl Drop for Prompt {
    fn drop(&mut self) {
        self.response.zeroize();
    }
}

// never print the response itself.
impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("hidden", &self.hidden)
            .field("response", &format_args!("<{} bytes>", self.response.len()))
            .finish()
    }
}

/// A batch of prompts, plus an optional line of information
/// ("Changing password for alice").
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub info:    String,
    pub prompts: Vec<Prompt>,
}

impl Request {
    pub fn new(prompts: Vec<Prompt>) -> Request {
        Request {
            info: String::new(),
            prompts,
        }
    }

    pub fn with_info(info: impl Into<String>, prompts: Vec<Prompt>) -> Request {
        Request {
            info: info.into(),
            prompts,
        }
    }

    pub fn valid(&self) -> bool {
        !self.prompts.is_empty()
    }

    /// The same request with every response stripped.
    pub fn without_responses(&self) -> Request {
        Request {
            info:    self.info.clone(),
            prompts: self.prompts.iter().map(|p| p.without_response()).collect(),
        }
    }

    pub fn clear(&mut self) {
        self.info.clear();
        // Prompt::drop wipes the responses.
        self.prompts.clear();
    }
}

// Structural: same prompts in the same order. The info line is decoration.
impl PartialEq for Request {
    fn eq(&self, other: &Request) -> bool {
        self.prompts == other.prompts
    }
}

impl Eq for Request {}
