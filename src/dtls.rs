//! DTLS authentication method, interface only.
//!
//! The DTLS method is an alternative strategy over the same session facade
//! as challenge-response. Only the parameter shape and the run contract are
//! defined here; the implementation is out of scope.

use tracing::error;

use crate::session::SessionInner;
use crate::types::AuthStatus;

/// Certificate material required by the DTLS method.
#[derive(Clone)]
pub struct DtlsCerts {
    /// PEM-encoded CA certificate chain.
    pub ca_chain: Vec<u8>,
    /// PEM-encoded device certificate.
    pub device_cert: Vec<u8>,
    /// PEM-encoded device private key.
    pub device_key: Vec<u8>,
}

impl std::fmt::Debug for DtlsCerts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtlsCerts")
            .field("ca_chain", &self.ca_chain.len())
            .field("device_cert", &self.device_cert.len())
            .field("device_key", &"..")
            .finish()
    }
}

/// Stub worker entry for the DTLS method.
pub(crate) fn run(_session: &SessionInner) -> AuthStatus {
    error!("DTLS authentication method is not implemented");
    AuthStatus::Failed
}
