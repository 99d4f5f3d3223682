// Conversation bridge.
//
// A backend asks its questions in batches of native messages and wants
// exactly one answer per message back, synchronously. We turn a batch
// into one Request to the caller, wait for the filled-in Request, and
// hand the answers back in the same positions.
//
// PAM usually asks one question per call. To show the user a whole form
// at once, a single login or password-change prompt is expanded into the
// complete template, and the extra answers are kept in a cache until PAM
// asks for them.
//
use std::error::Error;
use std::fmt;

use zeroize::Zeroizing;

use qauth::{ErrorKind, InfoKind, Prompt, PromptType, ProtoError, Request};

use super::classify::{announces_change, classify};
use crate::channel::Frontend;

/// Most messages in one conversation call.
pub const MAX_NUM_MSG: usize = 32;
/// Largest response, including the terminating NUL.
pub const MAX_RESP_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    PromptEchoOff,
    PromptEchoOn,
    ErrorMsg,
    TextInfo,
    Other(i32),
}

impl MessageStyle {
    /// From the PAM_* message style numbers.
    pub fn from_raw(style: i32) -> MessageStyle {
        match style {
            1 => MessageStyle::PromptEchoOff,
            2 => MessageStyle::PromptEchoOn,
            3 => MessageStyle::ErrorMsg,
            4 => MessageStyle::TextInfo,
            n => MessageStyle::Other(n),
        }
    }

    pub fn is_prompt(self) -> bool {
        self == MessageStyle::PromptEchoOff || self == MessageStyle::PromptEchoOn
    }
}

/// One native message.
#[derive(Debug, Clone)]
pub struct Message {
    pub style: MessageStyle,
    pub text:  String,
}

impl Message {
    pub fn new(style: MessageStyle, text: impl Into<String>) -> Message {
        Message {
            style,
            text: text.into(),
        }
    }
}

#[derive(Debug)]
pub enum ConvError {
    BatchSize(usize),
    UnknownStyle(i32),
    Transport(ProtoError),
    Mismatch(String),
}

impl fmt::Display for ConvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvError::BatchSize(n) => write!(f, "conversation with {} messages", n),
            ConvError::UnknownStyle(n) => write!(f, "unknown message style {}", n),
            ConvError::Transport(e) => write!(f, "transport: {}", e),
            ConvError::Mismatch(s) => write!(f, "response does not match request: {}", s),
        }
    }
}

impl Error for ConvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConvError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

/// One answer per message, `None` for messages that are not prompts.
pub type Responses = Vec<Option<Zeroizing<Vec<u8>>>>;

fn login_template() -> Vec<Prompt> {
    vec![
        Prompt::new(PromptType::LoginUser, "login:", false),
        Prompt::new(PromptType::LoginPassword, "Password:", true),
    ]
}

fn change_template() -> Vec<Prompt> {
    vec![
        Prompt::new(PromptType::ChangeCurrent, "(current) password:", true),
        Prompt::new(PromptType::ChangeNew, "New password:", true),
        Prompt::new(PromptType::ChangeRepeat, "Retype new password:", true),
    ]
}

/// Prompts seen so far, answered or not.
///
/// Owned by one backend; conversation calls never overlap.
#[derive(Default)]
pub struct PromptCache {
    prompts: Vec<Prompt>,
    info:    Option<String>,
}

impl PromptCache {
    pub fn new() -> PromptCache {
        PromptCache::default()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Wipe everything.
    pub fn clear(&mut self) {
        for p in self.prompts.iter_mut() {
            p.clear();
        }
        self.prompts.clear();
        self.info = None;
    }

    /// Find an entry: same type and text, or else any entry of the same
    /// type. Unknown prompts only match on exact text.
    pub fn find(&self, kind: PromptType, message: &str) -> Option<usize> {
        self.lookup(kind, message, &[])
    }

    // like find, but the type-only match skips entries in `claimed`:
    // those already answer another message of the same batch.
    fn lookup(&self, kind: PromptType, message: &str, claimed: &[usize]) -> Option<usize> {
        let exact = self.prompts.iter().position(|p| p.kind == kind && p.message == message);
        if exact.is_some() || kind == PromptType::Unknown {
            return exact;
        }
        self.prompts
            .iter()
            .enumerate()
            .position(|(idx, p)| p.kind == kind && !claimed.contains(&idx))
    }

    /// Add a prompt, unless one with the same type and text is there.
    pub fn insert(&mut self, prompt: Prompt) -> usize {
        match self.prompts.iter().position(|p| p.kind == prompt.kind && p.message == prompt.message) {
            Some(idx) => idx,
            None => {
                self.prompts.push(prompt);
                self.prompts.len() - 1
            },
        }
    }

    // add the template fields that are not there yet. the first one
    // gets the text the backend actually sent.
    fn insert_template(&mut self, mut template: Vec<Prompt>, first: Option<(&str, bool)>) {
        if let (Some((text, hidden)), Some(p)) = (first, template.first_mut()) {
            p.message = text.to_string();
            p.hidden = hidden;
        }
        for p in template.into_iter() {
            if self.find(p.kind, &p.message).is_none() {
                trace!("PromptCache::insert_template: {:?} {:?}", p.kind, p.message);
                self.prompts.push(p);
            }
        }
    }

    // cache slot for a prompt message. `claimed` are the slots of the
    // earlier messages in this batch.
    fn slot_for(&mut self, msg: &Message, single: bool, claimed: &[usize]) -> usize {
        let kind = classify(msg.style, &msg.text);
        let hidden = msg.style == MessageStyle::PromptEchoOff;

        if let Some(idx) = self.lookup(kind, &msg.text, claimed) {
            let p = &mut self.prompts[idx];
            if !p.has_response() {
                // show what the backend actually asks.
                p.message = msg.text.clone();
                p.hidden = hidden;
            }
            return idx;
        }

        if single {
            let template = match kind {
                PromptType::LoginUser => Some(login_template()),
                PromptType::ChangeCurrent => Some(change_template()),
                _ => None,
            };
            if let Some(template) = template {
                debug!("PromptCache::slot_for: {:?} predicts a template", kind);
                self.insert_template(template, Some((msg.text.as_str(), hidden)));
                if let Some(idx) = self.find(kind, &msg.text) {
                    return idx;
                }
            }
        }
        self.insert(Prompt::new(kind, msg.text.clone(), hidden))
    }

    /// Run one conversation call.
    ///
    /// On error the whole cache is wiped; the backend decides whether to
    /// try again.
    pub fn converse(&mut self, frontend: &mut dyn Frontend, msgs: &[Message]) -> Result<Responses, ConvError> {
        let res = self.converse2(frontend, msgs);
        if let Err(ref e) = res {
            debug!("PromptCache::converse: {}", e);
            self.clear();
        }
        res
    }

    fn converse2(&mut self, frontend: &mut dyn Frontend, msgs: &[Message]) -> Result<Responses, ConvError> {
        if msgs.is_empty() || msgs.len() > MAX_NUM_MSG {
            return Err(ConvError::BatchSize(msgs.len()));
        }
        for m in msgs {
            if let MessageStyle::Other(n) = m.style {
                return Err(ConvError::UnknownStyle(n));
            }
        }
        let single = msgs.len() == 1;

        // which cache entry answers which message.
        let mut slots: Vec<Option<usize>> = Vec::with_capacity(msgs.len());
        let mut claimed: Vec<usize> = Vec::new();
        for msg in msgs {
            let slot = match msg.style {
                MessageStyle::ErrorMsg => {
                    frontend.error(&msg.text, ErrorKind::Unknown);
                    None
                },
                MessageStyle::TextInfo => {
                    if single && announces_change(&msg.text) {
                        frontend.info(&msg.text, InfoKind::PassChangeRequired);
                        self.insert_template(change_template(), None);
                        self.info = Some(msg.text.clone());
                    } else {
                        frontend.info(&msg.text, InfoKind::Unknown);
                    }
                    None
                },
                style if style.is_prompt() => {
                    let idx = self.slot_for(msg, single, &claimed);
                    claimed.push(idx);
                    Some(idx)
                },
                _ => None,
            };
            slots.push(slot);
        }

        let unanswered = slots
            .iter()
            .filter_map(|s| *s)
            .any(|idx| !self.prompts[idx].has_response());
        if unanswered {
            self.round_trip(frontend)?;
        }

        let mut responses: Responses = Vec::with_capacity(msgs.len());
        for slot in &slots {
            responses.push(slot.map(|idx| {
                let resp = &self.prompts[idx].response;
                let len = resp.len().min(MAX_RESP_SIZE - 1);
                Zeroizing::new(resp[..len].to_vec())
            }));
        }

        // delivered answers are not given out twice.
        let mut delivered: Vec<usize> = slots.iter().filter_map(|s| *s).collect();
        delivered.sort_unstable();
        delivered.dedup();
        for idx in delivered.into_iter().rev() {
            self.prompts.remove(idx);
        }

        Ok(responses)
    }

    // ask the caller for every unanswered entry.
    fn round_trip(&mut self, frontend: &mut dyn Frontend) -> Result<(), ConvError> {
        let pending: Vec<usize> = (0..self.prompts.len())
            .filter(|&idx| !self.prompts[idx].has_response())
            .collect();
        let req = Request::with_info(
            self.info.take().unwrap_or_default(),
            pending.iter().map(|&idx| self.prompts[idx].without_response()).collect(),
        );
        if !req.valid() {
            return Ok(());
        }

        let filled = frontend.request(&req).map_err(ConvError::Transport)?;
        if filled.prompts.len() != req.prompts.len() {
            return Err(ConvError::Mismatch(format!(
                "sent {} prompts, got {}",
                req.prompts.len(),
                filled.prompts.len()
            )));
        }

        let mut assigned = vec![false; pending.len()];
        for fp in &filled.prompts {
            let pos = (0..pending.len()).find(|&i| !assigned[i] && req.prompts[i].same_field(fp));
            match pos {
                Some(i) => {
                    assigned[i] = true;
                    self.prompts[pending[i]].set_response(&fp.response);
                },
                None => {
                    return Err(ConvError::Mismatch(format!(
                        "unexpected {:?} prompt {:?}",
                        fp.kind, fp.message
                    )));
                },
            }
        }
        Ok(())
    }
}

impl Drop for PromptCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use qauth::Environment;

    // Answers every request by prompt type, and records what it saw.
    #[derive(Default)]
    pub(crate) struct Scripted {
        pub requests:  Vec<Request>,
        pub errors:    Vec<String>,
        pub infos:     Vec<(String, InfoKind)>,
        pub user:      String,
        pub password:  String,
        pub new_pass:  String,
        pub drop_last: bool,
        pub broken:    bool,
    }

    impl Scripted {
        pub fn new(user: &str, password: &str) -> Scripted {
            Scripted {
                user: user.to_string(),
                password: password.to_string(),
                new_pass: "n3w-s3cret".to_string(),
                ..Scripted::default()
            }
        }
    }

    impl Frontend for Scripted {
        fn error(&mut self, message: &str, _kind: ErrorKind) {
            self.errors.push(message.to_string());
        }
        fn info(&mut self, message: &str, kind: InfoKind) {
            self.infos.push((message.to_string(), kind));
        }
        fn request(&mut self, req: &Request) -> Result<Request, ProtoError> {
            if self.broken {
                return Err(ProtoError::Closed);
            }
            self.requests.push(req.clone());
            let mut filled = req.clone();
            for p in filled.prompts.iter_mut() {
                let answer = match p.kind {
                    PromptType::LoginUser => self.user.clone(),
                    PromptType::LoginPassword | PromptType::ChangeCurrent => self.password.clone(),
                    PromptType::ChangeNew | PromptType::ChangeRepeat => self.new_pass.clone(),
                    _ => "42".to_string(),
                };
                p.set_response(answer.as_bytes());
            }
            if self.drop_last {
                filled.prompts.pop();
            }
            Ok(filled)
        }
        fn authenticated(&mut self, _user: &str) -> Result<Environment, ProtoError> {
            Ok(Environment::new())
        }
        fn session_status(&mut self, _success: bool) -> Result<(), ProtoError> {
            Ok(())
        }
    }

    fn on(text: &str) -> Message {
        Message::new(MessageStyle::PromptEchoOn, text)
    }

    fn off(text: &str) -> Message {
        Message::new(MessageStyle::PromptEchoOff, text)
    }

    fn resp(r: &Option<Zeroizing<Vec<u8>>>) -> &[u8] {
        r.as_ref().map(|v| v.as_slice()).unwrap_or(b"<none>")
    }

    #[test]
    fn test_batch_size() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();
        match cache.converse(&mut fe, &[]) {
            Err(ConvError::BatchSize(0)) => {},
            r => panic!("expected BatchSize, got {:?}", r.map(|v| v.len())),
        }
        let msgs = vec![off("Password:"); MAX_NUM_MSG + 1];
        match cache.converse(&mut fe, &msgs) {
            Err(ConvError::BatchSize(33)) => {},
            r => panic!("expected BatchSize, got {:?}", r.map(|v| v.len())),
        }
        assert!(fe.requests.is_empty());
    }

    #[test]
    fn test_unknown_style() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();
        let msgs = vec![Message::new(MessageStyle::TextInfo, "hi"), Message::new(MessageStyle::Other(7), "?")];
        match cache.converse(&mut fe, &msgs) {
            Err(ConvError::UnknownStyle(7)) => {},
            r => panic!("expected UnknownStyle, got {:?}", r.map(|v| v.len())),
        }
        // nothing was processed.
        assert!(fe.infos.is_empty());
    }

    #[test]
    fn test_single_login_prompt_predicts_template() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();

        let r = cache.converse(&mut fe, &[on("login: ")]).unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(resp(&r[0]), b"alice");
        assert_eq!(fe.requests.len(), 1);
        let sent = &fe.requests[0];
        assert_eq!(sent.prompts.len(), 2);
        assert_eq!(sent.prompts[0].kind, PromptType::LoginUser);
        assert_eq!(sent.prompts[0].message, "login: ");
        assert!(!sent.prompts[0].hidden);
        assert_eq!(sent.prompts[1].kind, PromptType::LoginPassword);
        assert!(sent.prompts[1].hidden);
        assert!(sent.prompts.iter().all(|p| !p.has_response()));

        // the password comes from the cache, no second round trip.
        let r = cache.converse(&mut fe, &[off("Password: ")]).unwrap();
        assert_eq!(resp(&r[0]), b"secret");
        assert_eq!(fe.requests.len(), 1);
        assert!(cache.is_empty());

        // a retry asks again.
        let r = cache.converse(&mut fe, &[off("Password: ")]).unwrap();
        assert_eq!(resp(&r[0]), b"secret");
        assert_eq!(fe.requests.len(), 2);
        assert_eq!(fe.requests[1].prompts.len(), 1);
    }

    #[test]
    fn test_multi_message_batch() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();
        let msgs = vec![
            Message::new(MessageStyle::ErrorMsg, "Login incorrect"),
            on("login:"),
            Message::new(MessageStyle::TextInfo, "Last login: yesterday"),
            off("Password:"),
        ];
        let r = cache.converse(&mut fe, &msgs).unwrap();
        assert_eq!(r.len(), 4);
        assert!(r[0].is_none());
        assert_eq!(resp(&r[1]), b"alice");
        assert!(r[2].is_none());
        assert_eq!(resp(&r[3]), b"secret");
        assert_eq!(fe.errors, vec!["Login incorrect".to_string()]);
        assert_eq!(fe.infos[0].1, InfoKind::Unknown);
        assert_eq!(fe.requests.len(), 1);
        assert_eq!(fe.requests[0].prompts.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_type_twice_in_one_batch() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();
        let r = cache.converse(&mut fe, &[off("Password: "), off("LDAP password: ")]).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(resp(&r[0]), b"secret");
        assert_eq!(resp(&r[1]), b"secret");
        assert_eq!(fe.requests.len(), 1);
        let texts: Vec<_> = fe.requests[0].prompts.iter().map(|p| p.message.as_str()).collect();
        assert_eq!(texts, vec!["Password: ", "LDAP password: "]);

        let mut fe = Scripted::new("alice", "secret");
        let r = cache.converse(&mut fe, &[on("login: "), on("Verification code: ")]).unwrap();
        assert_eq!(r.len(), 2);
        let sent = &fe.requests[0].prompts;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].message, "login: ");
        assert_eq!(sent[1].message, "Verification code: ");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_batch_reuses_template_entry_once() {
        let mut fe = Scripted::new("alice", "secret");
        let mut cache = PromptCache::new();
        cache.insert_template(login_template(), None);

        // the first password prompt takes the template's field, the
        // second one gets its own.
        let r = cache.converse(&mut fe, &[off("Password: "), off("OTP password: ")]).unwrap();
        assert_eq!(r.len(), 2);
        let sent = &fe.requests[0].prompts;
        let fields: Vec<_> = sent.iter().map(|p| (p.kind, p.message.as_str())).collect();
        assert_eq!(fields, vec![
            (PromptType::LoginUser, "login:"),
            (PromptType::LoginPassword, "Password: "),
            (PromptType::LoginPassword, "OTP password: "),
        ]);
        // only the unused login field is left.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_password_change_flow() {
        let mut fe = Scripted::new("alice", "old-secret");
        let mut cache = PromptCache::new();

        let r = cache
            .converse(&mut fe, &[Message::new(MessageStyle::TextInfo, "Changing password for alice.")])
            .unwrap();
        assert!(r[0].is_none());
        assert_eq!(fe.infos[0].1, InfoKind::PassChangeRequired);
        assert!(fe.requests.is_empty());
        assert_eq!(cache.len(), 3);

        let r = cache.converse(&mut fe, &[off("(current) UNIX password: ")]).unwrap();
        assert_eq!(resp(&r[0]), b"old-secret");
        assert_eq!(fe.requests.len(), 1);
        let sent = &fe.requests[0];
        assert_eq!(sent.info, "Changing password for alice.");
        let kinds: Vec<_> = sent.prompts.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PromptType::ChangeCurrent, PromptType::ChangeNew, PromptType::ChangeRepeat]);
        assert_eq!(sent.prompts[0].message, "(current) UNIX password: ");

        let r = cache.converse(&mut fe, &[off("New password: ")]).unwrap();
        assert_eq!(resp(&r[0]), b"n3w-s3cret");
        let r = cache.converse(&mut fe, &[off("Retype new password: ")]).unwrap();
        assert_eq!(resp(&r[0]), b"n3w-s3cret");
        assert_eq!(fe.requests.len(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_dedup() {
        let mut cache = PromptCache::new();
        let a = cache.insert(Prompt::new(PromptType::Unknown, "PIN:", true));
        let b = cache.insert(Prompt::new(PromptType::Unknown, "PIN:", true));
        let c = cache.insert(Prompt::new(PromptType::Unknown, "Token:", true));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);

        cache.insert_template(login_template(), None);
        cache.insert_template(login_template(), None);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_truncate_response() {
        let long = "x".repeat(2 * MAX_RESP_SIZE);
        let mut fe = Scripted::new("alice", &long);
        let mut cache = PromptCache::new();
        let r = cache.converse(&mut fe, &[off("Password:")]).unwrap();
        assert_eq!(resp(&r[0]).len(), MAX_RESP_SIZE - 1);
    }

    #[test]
    fn test_mismatch_clears_cache() {
        let mut fe = Scripted::new("alice", "secret");
        fe.drop_last = true;
        let mut cache = PromptCache::new();
        match cache.converse(&mut fe, &[on("login:")]) {
            Err(ConvError::Mismatch(_)) => {},
            r => panic!("expected Mismatch, got {:?}", r.map(|v| v.len())),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_transport_error() {
        let mut fe = Scripted::new("alice", "secret");
        fe.broken = true;
        let mut cache = PromptCache::new();
        match cache.converse(&mut fe, &[off("Password:")]) {
            Err(ConvError::Transport(ProtoError::Closed)) => {},
            r => panic!("expected Transport, got {:?}", r.map(|v| v.len())),
        }
        assert!(cache.is_empty());
    }
}
