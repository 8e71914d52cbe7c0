//! Wire codec for the four challenge-response protocol messages.
//!
//! All messages are fixed-size and byte-packed: a 3-byte header (`soh`
//! encoded little-endian, then the message id) followed by the payload.
//! Decoding rejects short buffers, a wrong `soh`, and an unexpected id.

use crate::types::{AuthError, Result, CHALLENGE_LEN, RESPONSE_LEN};

/// Start-of-header magic, identifies and frames protocol messages.
pub const MSG_SOH: u16 = 0x65A2;

/// Size of the common message header in bytes.
pub const HEADER_LEN: usize = 3;

/// Wire size of [`ClientChallenge`].
pub const CLIENT_CHALLENGE_LEN: usize = HEADER_LEN + CHALLENGE_LEN;

/// Wire size of [`ServerResponse`].
pub const SERVER_RESPONSE_LEN: usize = HEADER_LEN + RESPONSE_LEN + CHALLENGE_LEN;

/// Wire size of [`ClientResponse`].
pub const CLIENT_RESPONSE_LEN: usize = HEADER_LEN + RESPONSE_LEN;

/// Wire size of [`HandshakeResult`].
pub const RESULT_LEN: usize = HEADER_LEN + 1;

/// Result byte signalling a successful verification.
pub const RESULT_SUCCESS: u8 = 0;

/// Result byte signalling a failed verification.
pub const RESULT_FAILURE: u8 = 1;

/// Message ids carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgId {
    /// Client's random challenge to the server.
    ClientChallenge = 0x01,
    /// Server's proof plus its own challenge.
    ServerResponse = 0x02,
    /// Client's proof for the server challenge.
    ClientResponse = 0x03,
    /// Final verdict, either direction.
    Result = 0x04,
}

impl MsgId {
    fn from_u8(id: u8) -> Option<Self> {
        match id {
            0x01 => Some(MsgId::ClientChallenge),
            0x02 => Some(MsgId::ServerResponse),
            0x03 => Some(MsgId::ClientResponse),
            0x04 => Some(MsgId::Result),
            _ => None,
        }
    }
}

/// Decode and validate the 3-byte message header.
///
/// Used by the server to dispatch on the message id before reading the rest
/// of the payload.
pub fn decode_header(data: &[u8]) -> Result<MsgId> {
    if data.len() < HEADER_LEN {
        return Err(AuthError::InvalidMessage(format!(
            "header too short: {} bytes",
            data.len()
        )));
    }

    let soh = u16::from_le_bytes([data[0], data[1]]);
    if soh != MSG_SOH {
        return Err(AuthError::InvalidMessage(format!(
            "bad start of header: {:#06X}",
            soh
        )));
    }

    MsgId::from_u8(data[2])
        .ok_or_else(|| AuthError::InvalidMessage(format!("unknown message id: {:#04X}", data[2])))
}

fn encode_header(out: &mut Vec<u8>, id: MsgId) {
    out.extend_from_slice(&MSG_SOH.to_le_bytes());
    out.push(id as u8);
}

fn check_msg(data: &[u8], expected_len: usize, expected_id: MsgId) -> Result<()> {
    if data.len() != expected_len {
        return Err(AuthError::InvalidMessage(format!(
            "wrong length: {} bytes (expected {})",
            data.len(),
            expected_len
        )));
    }

    let id = decode_header(data)?;
    if id != expected_id {
        return Err(AuthError::InvalidMessage(format!(
            "unexpected message id: {:?} (expected {:?})",
            id, expected_id
        )));
    }

    Ok(())
}

/// First message: the client's random challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChallenge {
    /// Random 32-byte challenge for the server to hash with the key.
    pub challenge: [u8; CHALLENGE_LEN],
}

impl ClientChallenge {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(CLIENT_CHALLENGE_LEN);
        encode_header(&mut data, MsgId::ClientChallenge);
        data.extend_from_slice(&self.challenge);
        data
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_msg(data, CLIENT_CHALLENGE_LEN, MsgId::ClientChallenge)?;

        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&data[HEADER_LEN..]);
        Ok(Self { challenge })
    }
}

/// Second message: the server's proof and its own challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    /// Hash of the client challenge with the shared key.
    pub response: [u8; RESPONSE_LEN],
    /// Random 32-byte challenge for the client to hash with the key.
    pub challenge: [u8; CHALLENGE_LEN],
}

impl ServerResponse {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SERVER_RESPONSE_LEN);
        encode_header(&mut data, MsgId::ServerResponse);
        data.extend_from_slice(&self.response);
        data.extend_from_slice(&self.challenge);
        data
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_msg(data, SERVER_RESPONSE_LEN, MsgId::ServerResponse)?;

        let mut offset = HEADER_LEN;

        let mut response = [0u8; RESPONSE_LEN];
        response.copy_from_slice(&data[offset..offset + RESPONSE_LEN]);
        offset += RESPONSE_LEN;

        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&data[offset..offset + CHALLENGE_LEN]);

        Ok(Self {
            response,
            challenge,
        })
    }
}

/// Third message: the client's proof for the server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    /// Hash of the server challenge with the shared key.
    pub response: [u8; RESPONSE_LEN],
}

impl ClientResponse {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(CLIENT_RESPONSE_LEN);
        encode_header(&mut data, MsgId::ClientResponse);
        data.extend_from_slice(&self.response);
        data
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_msg(data, CLIENT_RESPONSE_LEN, MsgId::ClientResponse)?;

        let mut response = [0u8; RESPONSE_LEN];
        response.copy_from_slice(&data[HEADER_LEN..]);
        Ok(Self { response })
    }
}

/// Final message: the verdict, sent by whichever side completes or rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// [`RESULT_SUCCESS`] or a nonzero failure code.
    pub result: u8,
}

impl HandshakeResult {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(RESULT_LEN);
        encode_header(&mut data, MsgId::Result);
        data.push(self.result);
        data
    }

    /// Decode from wire bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_msg(data, RESULT_LEN, MsgId::Result)?;
        Ok(Self {
            result: data[HEADER_LEN],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_sizes() {
        assert_eq!(CLIENT_CHALLENGE_LEN, 35);
        assert_eq!(SERVER_RESPONSE_LEN, 67);
        assert_eq!(CLIENT_RESPONSE_LEN, 35);
        assert_eq!(RESULT_LEN, 4);
    }

    #[test]
    fn test_client_challenge_layout() {
        let msg = ClientChallenge {
            challenge: [0x01u8; 32],
        };
        let encoded = msg.encode();

        assert_eq!(encoded.len(), CLIENT_CHALLENGE_LEN);
        // soh 0x65A2 little-endian, then the id.
        assert_eq!(&encoded[..3], &[0xA2, 0x65, 0x01]);
        assert_eq!(&encoded[3..], &[0x01u8; 32]);
    }

    #[test]
    fn test_server_response_layout() {
        let msg = ServerResponse {
            response: [0xAAu8; 32],
            challenge: [0x02u8; 32],
        };
        let encoded = msg.encode();

        assert_eq!(encoded.len(), SERVER_RESPONSE_LEN);
        assert_eq!(&encoded[..3], &[0xA2, 0x65, 0x02]);
        assert_eq!(&encoded[3..35], &[0xAAu8; 32]);
        assert_eq!(&encoded[35..], &[0x02u8; 32]);
    }

    #[test]
    fn test_result_layout() {
        let msg = HandshakeResult {
            result: RESULT_SUCCESS,
        };
        assert_eq!(msg.encode(), vec![0xA2, 0x65, 0x04, 0x00]);

        let msg = HandshakeResult {
            result: RESULT_FAILURE,
        };
        assert_eq!(msg.encode(), vec![0xA2, 0x65, 0x04, 0x01]);
    }

    #[test]
    fn test_roundtrips() {
        let chal = ClientChallenge {
            challenge: [0x11u8; 32],
        };
        assert_eq!(ClientChallenge::decode(&chal.encode()).unwrap(), chal);

        let resp = ServerResponse {
            response: [0x22u8; 32],
            challenge: [0x33u8; 32],
        };
        assert_eq!(ServerResponse::decode(&resp.encode()).unwrap(), resp);

        let client_resp = ClientResponse {
            response: [0x44u8; 32],
        };
        assert_eq!(
            ClientResponse::decode(&client_resp.encode()).unwrap(),
            client_resp
        );

        let result = HandshakeResult { result: 1 };
        assert_eq!(HandshakeResult::decode(&result.encode()).unwrap(), result);
    }

    #[test]
    fn test_decode_bad_soh() {
        let mut data = ClientChallenge {
            challenge: [0u8; 32],
        }
        .encode();
        data[0] = 0x00;
        data[1] = 0x00;

        let result = ClientChallenge::decode(&data);
        assert!(matches!(result, Err(AuthError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_unknown_id() {
        let mut data = HandshakeResult { result: 0 }.encode();
        data[2] = 0x05;

        assert!(matches!(
            decode_header(&data),
            Err(AuthError::InvalidMessage(_))
        ));

        data[2] = 0x00;
        assert!(matches!(
            decode_header(&data),
            Err(AuthError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_decode_wrong_id() {
        // A valid Result header is not a valid ClientChallenge, even padded
        // to the right length.
        let mut data = vec![0u8; CLIENT_CHALLENGE_LEN];
        data[..2].copy_from_slice(&MSG_SOH.to_le_bytes());
        data[2] = MsgId::Result as u8;

        let result = ClientChallenge::decode(&data);
        assert!(matches!(result, Err(AuthError::InvalidMessage(_))));
    }

    #[test]
    fn test_decode_short_buffer() {
        let data = ServerResponse {
            response: [0u8; 32],
            challenge: [0u8; 32],
        }
        .encode();

        let result = ServerResponse::decode(&data[..50]);
        assert!(matches!(result, Err(AuthError::InvalidMessage(_))));

        assert!(matches!(
            decode_header(&data[..2]),
            Err(AuthError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_header_decode() {
        let data = ClientResponse {
            response: [0u8; 32],
        }
        .encode();
        assert_eq!(decode_header(&data).unwrap(), MsgId::ClientResponse);
    }
}
