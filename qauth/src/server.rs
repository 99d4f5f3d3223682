// Listening socket for helper connections.
//
// One AuthServer serves any number of concurrent authentications. Each
// Auth registers itself and gets a session id; the helper it launches
// connects to the socket and says Hello(id), and the server hands the
// connection to whoever registered that id.
//
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::messages::{HelperMsg, Message};
use crate::stream_channel;

// how long a fresh connection has to introduce itself.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

struct Registry {
    id_seq:  u64,
    waiters: HashMap<u64, oneshot::Sender<UnixStream>>,
}

/// The listening socket and its registry of waiting sessions.
pub struct AuthServer {
    path:     PathBuf,
    registry: Arc<Mutex<Registry>>,
    task:     Option<JoinHandle<()>>,
}

impl AuthServer {
    /// Bind the socket at `path` and start accepting connections.
    ///
    /// A stale socket at `path` is removed first. The socket is only
    /// accessible by the current user.
    ///
    /// Note that you must call this from within the tokio runtime.
    pub fn start(path: impl AsRef<Path>) -> io::Result<AuthServer> {
        let path = path.as_ref().to_path_buf();
        match fs::remove_file(&path) {
            Ok(()) => debug!("AuthServer::start: removed stale socket {:?}", path),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        let registry = Arc::new(Mutex::new(Registry {
            id_seq:  0,
            waiters: HashMap::new(),
        }));
        let task = tokio::spawn(accept_loop(listener, registry.clone()));
        info!("AuthServer::start: listening on {:?}", path);

        Ok(AuthServer {
            path,
            registry,
            task: Some(task),
        })
    }

    /// `$XDG_RUNTIME_DIR/qauth-<pid>.sock`, or in `/tmp` if that is not set.
    pub fn default_path() -> PathBuf {
        let dir = env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        dir.join(format!("qauth-{}.sock", std::process::id()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a new session id, and a receiver for the connection that
    /// will announce itself with that id.
    pub fn register(&self) -> (u64, oneshot::Receiver<UnixStream>) {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.registry.lock().unwrap();
        registry.id_seq += 1;
        let id = registry.id_seq;
        registry.waiters.insert(id, tx);
        trace!("AuthServer::register: id {}", id);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.registry.lock().unwrap().waiters.remove(&id);
    }

    /// Stop accepting, remove the socket, and fail everyone still waiting.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("AuthServer::stop: remove {:?}: {}", self.path, e);
            }
            self.registry.lock().unwrap().waiters.clear();
            info!("AuthServer::stop: stopped listening on {:?}", self.path);
        }
    }
}

impl Drop for AuthServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(listener: UnixListener, registry: Arc<Mutex<Registry>>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("AuthServer::accept_loop: accept: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            },
        };
        tokio::spawn(route(stream, registry.clone()));
    }
}

// wait for Hello, then pass the connection on.
async fn route(mut stream: UnixStream, registry: Arc<Mutex<Registry>>) {
    let hello = tokio::time::timeout(HELLO_TIMEOUT, stream_channel::recv_async::<_, HelperMsg>(&mut stream));
    let id = match hello.await {
        Ok(Ok(Some(HelperMsg::Hello { id }))) => id,
        Ok(Ok(Some(msg))) => {
            warn!("AuthServer::route: expected Hello, got {:?}", msg.kind());
            return;
        },
        Ok(Ok(None)) => {
            debug!("AuthServer::route: connection closed before Hello");
            return;
        },
        Ok(Err(e)) => {
            warn!("AuthServer::route: {}", e);
            return;
        },
        Err(_) => {
            warn!("AuthServer::route: timeout waiting for Hello");
            return;
        },
    };

    let waiter = registry.lock().unwrap().waiters.remove(&id);
    match waiter {
        Some(tx) => {
            debug!("AuthServer::route: connection for id {}", id);
            if tx.send(stream).is_err() {
                debug!("AuthServer::route: id {} no longer waiting", id);
            }
        },
        None => warn!("AuthServer::route: unknown id {}, dropping connection", id),
    }
}
