//! Server running on its own thread
//!
//! [`ServerThread`] owns a single-worker runtime and drives a [`Server`]
//! there until stopped. The server is built on that runtime because its
//! sockets stay registered with the runtime that created them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Server;
use crate::config::ServerConfig;
use crate::error::{OscError, Result};

/// Runs on the server thread before the first receive; an error stops it
pub type InitCallback = Box<dyn FnMut() -> Result<()> + Send>;

/// Runs on the server thread after the last receive
pub type CleanupCallback = Box<dyn FnMut() + Send>;

/// How often the loop checks whether it should stop
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Callbacks {
    init: Option<InitCallback>,
    cleanup: Option<CleanupCallback>,
}

pub struct ServerThread {
    runtime: Runtime,
    server: Arc<tokio::sync::Mutex<Server>>,
    active: Arc<AtomicBool>,
    callbacks: Arc<Mutex<Callbacks>>,
    handle: Option<JoinHandle<()>>,
    url: String,
    port: Option<u16>,
}

impl ServerThread {
    /// Binds a server as described by `config`. The thread starts with
    /// [`ServerThread::start`].
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("osclink-server")
            .enable_all()
            .build()?;
        let server = runtime.block_on(Server::with_config(config))?;
        let url = server.url();
        let port = server.port();

        Ok(Self {
            runtime,
            server: Arc::new(tokio::sync::Mutex::new(server)),
            active: Arc::new(AtomicBool::new(false)),
            callbacks: Arc::new(Mutex::new(Callbacks::default())),
            handle: None,
            url,
            port,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Installs callbacks run on the server thread when it starts and stops
    pub fn set_callbacks(&self, init: Option<InitCallback>, cleanup: Option<CleanupCallback>) {
        let mut callbacks = self.callbacks.lock();
        callbacks.init = init;
        callbacks.cleanup = cleanup;
    }

    /// Runs `f` with exclusive access to the server, waiting for the
    /// current receive to finish. Must not be called from async code.
    pub fn with_server<R>(&self, f: impl FnOnce(&mut Server) -> R) -> R {
        let mut server = self.server.blocking_lock();
        f(&mut server)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(OscError::Internal("server thread is already running".into()));
        }
        let server = self.server.clone();
        let active = self.active.clone();
        let callbacks = self.callbacks.clone();

        self.handle = Some(self.runtime.spawn(async move {
            let init = callbacks.lock().init.as_mut().map(|init| init());
            if let Some(Err(e)) = init {
                error!(error = %e, "Server thread init failed");
                active.store(false, Ordering::Release);
                return;
            }
            debug!("Server thread running");

            while active.load(Ordering::Acquire) {
                let result = server.lock().await.recv_timeout(POLL_INTERVAL).await;
                if let Err(e) = result {
                    warn!(error = %e, "Receive failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }

            if let Some(cleanup) = callbacks.lock().cleanup.as_mut() {
                cleanup();
            }
            debug!("Server thread stopped");
        }));
        Ok(())
    }

    /// Signals the loop and waits for it to finish. Must not be called
    /// from a method handler.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = futures::executor::block_on(handle) {
                warn!(error = %e, "Server thread ended abnormally");
            }
        }
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerThread")
            .field("url", &self.url)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerResult;
    use crate::protocol::{Argument, Message};
    use std::sync::mpsc;

    #[test]
    fn test_thread_dispatches_and_runs_callbacks() {
        let mut thread = ServerThread::new(&ServerConfig::default()).unwrap();
        let port = thread.port().unwrap();
        assert!(thread.url().contains(&format!(":{}/", port)));

        let (tx, rx) = mpsc::channel();
        thread.with_server(|server| {
            server
                .add_method(Some("/note"), Some("i"), move |_: &str, _: &str, args: &[Argument], _: &Message| {
                    let _ = tx.send(args[0].as_i32());
                    HandlerResult::Handled
                })
                .unwrap();
        });

        let events = Arc::new(Mutex::new(Vec::new()));
        let (on_init, on_cleanup) = (events.clone(), events.clone());
        thread.set_callbacks(
            Some(Box::new(move || {
                on_init.lock().push("init");
                Ok(())
            })),
            Some(Box::new(move || on_cleanup.lock().push("cleanup"))),
        );

        thread.start().unwrap();
        assert!(thread.is_active());
        assert!(thread.start().is_err());

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let data = Message::new().with_arg(60i32).serialize("/note").unwrap();
        client.send_to(&data, ("127.0.0.1", port)).unwrap();

        let got = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, Some(60));

        thread.stop();
        assert!(!thread.is_active());
        assert_eq!(*events.lock(), vec!["init", "cleanup"]);
    }

    #[test]
    fn test_failed_init_stops_thread() {
        let mut thread = ServerThread::new(&ServerConfig::default()).unwrap();
        thread.set_callbacks(Some(Box::new(|| Err(OscError::Internal("no".into())))), None);
        thread.start().unwrap();
        thread.stop();
        assert!(!thread.is_active());
        // restartable once stopped
        thread.set_callbacks(None, None);
        thread.start().unwrap();
        assert!(thread.is_active());
    }
}
