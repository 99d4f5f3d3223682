// Caller-side request controller.
//
// The helper sends a Request; the application fills in the responses
// through an AuthRequest and says when it is done. The filled-in request
// then goes back to the helper.
//
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::prompt::{Prompt, Request};

type Callback = Arc<dyn Fn() + Send + Sync>;

struct State {
    info:                 String,
    prompts:              Vec<Prompt>,
    finish_automatically: bool,
    finished:             bool,
    done_tx:              Option<oneshot::Sender<Request>>,
    on_finished:          Vec<Callback>,
}

impl State {
    fn all_answered(&self) -> bool {
        !self.prompts.is_empty() && self.prompts.iter().all(|p| p.has_response())
    }
}

/// Handle to the request that is currently in flight.
///
/// Cheap to clone; all clones refer to the same request.
#[derive(Clone)]
pub struct AuthRequest {
    inner: Arc<Mutex<State>>,
}

impl AuthRequest {
    pub fn new() -> AuthRequest {
        AuthRequest {
            inner: Arc::new(Mutex::new(State {
                info:                 String::new(),
                prompts:              Vec::new(),
                finish_automatically: false,
                finished:             true,
                done_tx:              None,
                on_finished:          Vec::new(),
            })),
        }
    }

    /// Take a new request from the helper.
    ///
    /// Prompts of a previous request are wiped. The returned receiver
    /// resolves with the filled-in request once `done` has run.
    pub(crate) fn set_request(&self, req: &Request) -> oneshot::Receiver<Request> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock().unwrap();
        for p in state.prompts.iter_mut() {
            p.clear();
        }
        state.prompts = req.prompts.clone();
        state.info = req.info.clone();
        state.finished = false;
        state.done_tx = Some(tx);
        debug!("AuthRequest::set_request: {} prompts", state.prompts.len());
        rx
    }

    /// Informational line that came with the request.
    pub fn info(&self) -> String {
        self.inner.lock().unwrap().info.clone()
    }

    /// The prompts of this request, without their responses.
    pub fn prompts(&self) -> Vec<Prompt> {
        let state = self.inner.lock().unwrap();
        state.prompts.iter().map(|p| p.without_response()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().prompts.len()
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().finished
    }

    pub fn finish_automatically(&self) -> bool {
        self.inner.lock().unwrap().finish_automatically
    }

    /// Choose the completion mode. Must be done before responses are set;
    /// later changes are ignored.
    pub fn set_finish_automatically(&self, automatic: bool) {
        let mut state = self.inner.lock().unwrap();
        if state.prompts.iter().any(|p| p.has_response()) {
            warn!("AuthRequest::set_finish_automatically: responses already set, ignored");
            return;
        }
        state.finish_automatically = automatic;
    }

    /// Register a callback that runs when a request is finished.
    pub fn connect_finished<F>(&self, f: F)
    where F: Fn() + Send + Sync + 'static {
        self.inner.lock().unwrap().on_finished.push(Arc::new(f));
    }

    /// Set the response of prompt `idx`. Returns false if there is no
    /// such prompt or the request was already finished.
    ///
    /// In automatic mode, answering the last empty prompt finishes the
    /// request.
    pub fn set_response(&self, idx: usize, response: &[u8]) -> bool {
        let complete = {
            let mut state = self.inner.lock().unwrap();
            if state.finished {
                return false;
            }
            match state.prompts.get_mut(idx) {
                Some(p) => p.set_response(response),
                None => return false,
            }
            state.finish_automatically && state.all_answered()
        };
        if complete {
            self.done();
        }
        true
    }

    /// The request as it stands, responses included.
    pub fn request(&self) -> Request {
        let state = self.inner.lock().unwrap();
        Request::with_info(state.info.clone(), state.prompts.clone())
    }

    /// Hand the filled-in request back. Runs at most once per request.
    pub fn done(&self) {
        let (req, tx, callbacks) = {
            let mut state = self.inner.lock().unwrap();
            if state.finished {
                trace!("AuthRequest::done: already finished");
                return;
            }
            state.finished = true;
            let req = Request::with_info(state.info.clone(), state.prompts.clone());
            (req, state.done_tx.take(), state.on_finished.clone())
        };
        debug!("AuthRequest::done: {} prompts", req.prompts.len());
        if let Some(tx) = tx {
            // receiver gone means the exchange was aborted.
            let _ = tx.send(req);
        }
        for cb in &callbacks {
            cb();
        }
    }
}

impl Default for AuthRequest {
    fn default() -> AuthRequest {
        AuthRequest::new()
    }
}
