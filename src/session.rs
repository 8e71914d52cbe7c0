//! Session facade owning one authentication attempt.
//!
//! An [`AuthSession`] validates its configuration at init, runs the selected
//! method on a dedicated worker thread, publishes status transitions through
//! a caller-supplied callback, and supports cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

use crate::crypto::SharedKey;
use crate::dtls::{self, DtlsCerts};
use crate::handshake;
use crate::transport::Transport;
use crate::types::{flags, AuthError, AuthStatus, InstanceId, Result, Role};
use crate::types::{HANDSHAKE_DEADLINE, RX_TIMEOUT};

/// Status callback signature.
///
/// Invoked synchronously on the thread performing the transition, for every
/// status change including the terminal one. Captured state takes the place
/// of an opaque context argument.
pub type StatusCallback = dyn Fn(InstanceId, AuthStatus) + Send + Sync;

/// Timeouts governing the handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeTimeouts {
    /// Timeout for each receive attempt.
    pub rx_timeout: Duration,
    /// Overall deadline for the whole handshake.
    pub deadline: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            rx_timeout: RX_TIMEOUT,
            deadline: HANDSHAKE_DEADLINE,
        }
    }
}

/// Method-specific parameter supplied at session init.
#[derive(Debug, Clone)]
pub enum OptionalParam {
    /// Certificates for the DTLS method.
    Dtls(DtlsCerts),
    /// Shared-key override for the challenge-response method.
    ChallengeResponse(SharedKey),
}

/// Authentication method selected by the session flags.
pub(crate) enum Method {
    ChallengeResponse,
    Dtls(#[allow(dead_code)] DtlsCerts),
}

/// State shared between the facade, the worker, and the handshake.
pub(crate) struct SessionInner {
    pub(crate) instance: InstanceId,
    pub(crate) role: Role,
    pub(crate) key: SharedKey,
    pub(crate) transport: Arc<Transport>,
    pub(crate) timeouts: HandshakeTimeouts,
    method: Method,
    cancel: AtomicBool,
    status: Mutex<AuthStatus>,
    // Serializes transitions so callbacks fire in status order. `status` has
    // its own lock so a callback may query it without deadlocking.
    transition: Mutex<()>,
    callback: Box<StatusCallback>,
}

impl SessionInner {
    pub(crate) fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Records a status transition and invokes the callback.
    ///
    /// Statuses are monotonic: once a terminal status is recorded, later
    /// transitions are ignored. This makes the cancel-versus-worker race
    /// harmless.
    pub(crate) fn set_status(&self, status: AuthStatus) {
        let _transition = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        {
            let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_terminal() {
                return;
            }
            *current = status;
        }

        (self.callback)(self.instance, status);
    }

    fn status(&self) -> AuthStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One mutual authentication attempt between two peers.
pub struct AuthSession {
    inner: Arc<SessionInner>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl AuthSession {
    /// Creates a session.
    ///
    /// `flags` must set exactly one of [`flags::SERVER`] / [`flags::CLIENT`]
    /// and exactly one of [`flags::DTLS_METHOD`] /
    /// [`flags::CHALLENGE_METHOD`]. The DTLS method requires
    /// [`OptionalParam::Dtls`]; the challenge-response method accepts an
    /// optional [`OptionalParam::ChallengeResponse`] key override, which is
    /// copied into session-owned storage.
    pub fn new(
        instance: InstanceId,
        status_cb: impl Fn(InstanceId, AuthStatus) + Send + Sync + 'static,
        transport: Arc<Transport>,
        optional_param: Option<OptionalParam>,
        session_flags: u32,
    ) -> Result<Self> {
        let role = match (
            session_flags & flags::SERVER != 0,
            session_flags & flags::CLIENT != 0,
        ) {
            (true, false) => Role::Server,
            (false, true) => Role::Client,
            _ => {
                return Err(AuthError::InvalidParam(
                    "exactly one of SERVER or CLIENT must be set",
                ))
            }
        };

        let wants_dtls = session_flags & flags::DTLS_METHOD != 0;
        let wants_chalresp = session_flags & flags::CHALLENGE_METHOD != 0;
        if wants_dtls == wants_chalresp {
            return Err(AuthError::InvalidParam(
                "exactly one of DTLS_METHOD or CHALLENGE_METHOD must be set",
            ));
        }

        let mut key = SharedKey::default();
        let method = if wants_dtls {
            match optional_param {
                Some(OptionalParam::Dtls(certs)) => Method::Dtls(certs),
                _ => {
                    return Err(AuthError::InvalidParam(
                        "DTLS method requires certificates",
                    ))
                }
            }
        } else {
            if let Some(OptionalParam::ChallengeResponse(override_key)) = optional_param {
                key = override_key;
            }
            Method::ChallengeResponse
        };

        Ok(Self {
            inner: Arc::new(SessionInner {
                instance,
                role,
                key,
                transport,
                timeouts: HandshakeTimeouts::default(),
                method,
                cancel: AtomicBool::new(false),
                status: Mutex::new(AuthStatus::Idle),
                transition: Mutex::new(()),
                callback: Box::new(status_cb),
            }),
            worker: None,
        })
    }

    /// Overrides the handshake timeouts. Only valid before [`Self::start`].
    pub fn set_timeouts(&mut self, timeouts: HandshakeTimeouts) -> Result<()> {
        let inner = Arc::get_mut(&mut self.inner)
            .ok_or(AuthError::InvalidParam("session already started"))?;
        inner.timeouts = timeouts;
        Ok(())
    }

    /// Spawns the worker thread that runs the handshake.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(AuthError::InvalidParam("session already started"));
        }

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name(format!("auth-worker-{}", self.inner.instance))
            .spawn(move || run_worker(inner))
            .map_err(|e| AuthError::NoResource(format!("failed to spawn worker: {}", e)))?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Cancels the session.
    ///
    /// Publishes [`AuthStatus::Canceled`] immediately; the worker observes
    /// the flag at its next receive iteration and exits, at most one receive
    /// timeout later.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::Relaxed);
        self.inner.set_status(AuthStatus::Canceled);
    }

    /// Current session status.
    pub fn status(&self) -> AuthStatus {
        self.inner.status()
    }

    /// This session's instance id.
    pub fn instance(&self) -> InstanceId {
        self.inner.instance
    }

    /// Waits for the worker to terminate and returns the final status.
    ///
    /// Resources may only be released once the worker has exited; this is
    /// the join point.
    pub fn wait(&mut self) -> AuthStatus {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(instance = %self.inner.instance, "worker thread panicked");
                self.inner.set_status(AuthStatus::Failed);
            }
        }
        self.status()
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel();
            self.wait();
        }
    }
}

/// Worker entry: publishes the start, runs the method, publishes the
/// terminal status.
fn run_worker(inner: Arc<SessionInner>) {
    inner.set_status(AuthStatus::Started);

    let status = match &inner.method {
        Method::ChallengeResponse => handshake::run(&inner),
        Method::Dtls(_) => dtls::run(&inner),
    };
    inner.set_status(status);

    debug!(instance = %inner.instance, status = %status, "authentication worker complete");
}
