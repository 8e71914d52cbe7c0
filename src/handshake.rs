//! Challenge-response handshake state machine.
//!
//! Runs on the session worker and drives the four-message exchange for
//! either role, mapping every outcome to a terminal [`AuthStatus`].

use std::time::Instant;

use tracing::{debug, error, warn};

use crate::crypto::{challenge_hash, generate_challenge, responses_match};
use crate::message::{
    decode_header, ClientChallenge, ClientResponse, HandshakeResult, MsgId, ServerResponse,
    CLIENT_CHALLENGE_LEN, HEADER_LEN, RESULT_FAILURE, RESULT_LEN, RESULT_SUCCESS,
    SERVER_RESPONSE_LEN,
};
use crate::session::SessionInner;
use crate::types::{AuthError, AuthStatus, Result, Role, RESPONSE_LEN};

/// Executes the handshake for the session's role and returns the terminal
/// status to publish.
pub(crate) fn run(session: &SessionInner) -> AuthStatus {
    let result = match session.role {
        Role::Client => run_client(session),
        Role::Server => run_server(session),
    };

    match result {
        Ok(status) => status,
        Err(AuthError::Canceled) => AuthStatus::Canceled,
        Err(AuthError::AuthenticationFailed) => AuthStatus::AuthenticationFailed,
        Err(e) => {
            error!(role = ?session.role, "handshake aborted: {}", e);
            AuthStatus::Failed
        }
    }
}

/// Client role: challenge the server, verify its proof, prove ourselves,
/// await the verdict.
fn run_client(session: &SessionInner) -> Result<AuthStatus> {
    let deadline = Instant::now() + session.timeouts.deadline;

    let challenge = generate_challenge();
    send_message(session, &ClientChallenge { challenge }.encode())?;

    if session.canceled() {
        return Err(AuthError::Canceled);
    }

    let mut buf = [0u8; SERVER_RESPONSE_LEN];
    recv_exact(session, &mut buf, deadline)?;
    let server_resp = ServerResponse::decode(&buf)?;

    let expected = challenge_hash(&challenge, &session.key);
    if !responses_match(&server_resp.response, &expected) {
        error!("server failed to prove possession of the shared key");

        // Tell the peer it was rejected. Best-effort: a send failure is
        // logged and does not change the outcome.
        let notice = HandshakeResult {
            result: RESULT_FAILURE,
        };
        if let Err(e) = send_message(session, &notice.encode()) {
            warn!("failed to send rejection notice to server: {}", e);
        }
        return Ok(AuthStatus::AuthenticationFailed);
    }

    let response = challenge_hash(&server_resp.challenge, &session.key);
    send_message(session, &ClientResponse { response }.encode())?;
    session.set_status(AuthStatus::InProcess);

    // Any trouble while awaiting the verdict counts against the peer.
    let mut buf = [0u8; RESULT_LEN];
    recv_exact(session, &mut buf, deadline).map_err(|e| match e {
        AuthError::Canceled => AuthError::Canceled,
        e => {
            error!("failed to receive server verdict: {}", e);
            AuthError::AuthenticationFailed
        }
    })?;
    let verdict = HandshakeResult::decode(&buf).map_err(|e| {
        error!("invalid verdict from server: {}", e);
        AuthError::AuthenticationFailed
    })?;

    if verdict.result == RESULT_SUCCESS {
        debug!("authentication with server successful");
        Ok(AuthStatus::Successful)
    } else {
        error!("server rejected our response");
        Ok(AuthStatus::AuthenticationFailed)
    }
}

/// Server role: await the client challenge, prove ourselves while issuing our
/// own challenge, then judge the client's proof.
fn run_server(session: &SessionInner) -> Result<AuthStatus> {
    let deadline = Instant::now() + session.timeouts.deadline;

    let challenge = generate_challenge();

    let mut buf = [0u8; CLIENT_CHALLENGE_LEN];
    recv_exact(session, &mut buf, deadline)?;
    let client_chal = ClientChallenge::decode(&buf)?;

    let response = ServerResponse {
        response: challenge_hash(&client_chal.challenge, &session.key),
        challenge,
    };
    send_message(session, &response.encode())?;
    session.set_status(AuthStatus::InProcess);

    if session.canceled() {
        return Err(AuthError::Canceled);
    }

    // Header first: the client either proves itself or reports that it
    // rejected us.
    let mut header = [0u8; HEADER_LEN];
    recv_exact(session, &mut header, deadline)?;

    match decode_header(&header)? {
        MsgId::Result => {
            // The header alone means the client rejected us; the result byte
            // is informational and a failed read of it does not change the
            // outcome.
            let mut result = [0u8; 1];
            match recv_exact(session, &mut result, deadline) {
                Ok(()) => {
                    if result[0] == RESULT_SUCCESS {
                        warn!(result = result[0], "unexpected result value from client");
                    }
                }
                Err(e) => {
                    warn!("failed to read client result payload: {}", e);
                }
            }
            error!("client rejected our response");
            Ok(AuthStatus::AuthenticationFailed)
        }
        MsgId::ClientResponse => {
            let mut received = [0u8; RESPONSE_LEN];
            recv_exact(session, &mut received, deadline)?;

            let expected = challenge_hash(&challenge, &session.key);
            let verified = responses_match(&received, &expected);

            let verdict = HandshakeResult {
                result: if verified {
                    RESULT_SUCCESS
                } else {
                    RESULT_FAILURE
                },
            };
            send_message(session, &verdict.encode())?;

            if verified {
                debug!("authentication with client successful");
                Ok(AuthStatus::Successful)
            } else {
                error!("client failed to prove possession of the shared key");
                Ok(AuthStatus::AuthenticationFailed)
            }
        }
        id => Err(AuthError::InvalidMessage(format!(
            "unexpected message in place of client response: {:?}",
            id
        ))),
    }
}

/// Sends one whole protocol message; a short write is fatal.
fn send_message(session: &SessionInner, data: &[u8]) -> Result<()> {
    let written = session.transport.send(data)?;
    if written != data.len() {
        return Err(AuthError::Failed(format!(
            "short write: {} of {} bytes",
            written,
            data.len()
        )));
    }
    Ok(())
}

/// Reads exactly `buf.len()` bytes, looping on partial reads.
///
/// Each iteration checks the cancel flag and the overall deadline; a receive
/// timeout continues the loop, any other transport error aborts.
fn recv_exact(session: &SessionInner, buf: &mut [u8], deadline: Instant) -> Result<()> {
    let mut filled = 0;

    while filled < buf.len() {
        if session.canceled() {
            return Err(AuthError::Canceled);
        }
        if Instant::now() >= deadline {
            return Err(AuthError::Failed("handshake deadline exceeded".into()));
        }

        match session
            .transport
            .recv(&mut buf[filled..], session.timeouts.rx_timeout)
        {
            Ok(n) => filled += n,
            Err(AuthError::TimedOut) => continue,
            Err(e) => return Err(e),
        }
    }

    // The flag may have been raised during the final blocking read.
    if session.canceled() {
        return Err(AuthError::Canceled);
    }
    Ok(())
}
