//! Wire protocol message codec.
//!
//! Framing: a 4-byte big-endian length (excluding the length field
//! itself), one type byte, then the payload. Integers are big-endian on
//! the wire; strings are length-prefixed (u32 BE) UTF-8. TLS uses the
//! same framing over an encrypted stream; the transport itself lives
//! outside this crate.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{DbError, DbResult};

/// Default TCP port for the server.
pub const DEFAULT_PORT: u16 = 24678;

/// Wire message type tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    AuthRequest = 0x01,
    AuthResponse = 0x02,
    QueryRequest = 0x10,
    QueryResponse = 0x11,
    ErrorResponse = 0x20,
    Ping = 0x30,
    Pong = 0x31,
    Disconnect = 0x32,
    Begin = 0x40,
    Commit = 0x41,
    Rollback = 0x42,
}

impl TryFrom<u8> for MessageType {
    type Error = DbError;

    fn try_from(tag: u8) -> DbResult<Self> {
        Ok(match tag {
            0x01 => MessageType::AuthRequest,
            0x02 => MessageType::AuthResponse,
            0x10 => MessageType::QueryRequest,
            0x11 => MessageType::QueryResponse,
            0x20 => MessageType::ErrorResponse,
            0x30 => MessageType::Ping,
            0x31 => MessageType::Pong,
            0x32 => MessageType::Disconnect,
            0x40 => MessageType::Begin,
            0x41 => MessageType::Commit,
            0x42 => MessageType::Rollback,
            other => {
                return Err(DbError::Corruption(format!(
                    "unknown message type {other:#04x}"
                )))
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    pub protocol_version: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResponse {
    pub status: u8,
    pub session_id: u64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest {
    pub session_id: u64,
    pub sql: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResponse {
    pub status: u8,
    pub result_type: u8,
    pub rows_affected: u64,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub current_database: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    pub detail: String,
}

/// Every message the core produces or consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    QueryRequest(QueryRequest),
    QueryResponse(QueryResponse),
    ErrorResponse(ErrorResponse),
    Ping,
    Pong,
    Disconnect,
    Begin,
    Commit,
    Rollback,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::AuthRequest(_) => MessageType::AuthRequest,
            Message::AuthResponse(_) => MessageType::AuthResponse,
            Message::QueryRequest(_) => MessageType::QueryRequest,
            Message::QueryResponse(_) => MessageType::QueryResponse,
            Message::ErrorResponse(_) => MessageType::ErrorResponse,
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
            Message::Disconnect => MessageType::Disconnect,
            Message::Begin => MessageType::Begin,
            Message::Commit => MessageType::Commit,
            Message::Rollback => MessageType::Rollback,
        }
    }

    /// Encode the full frame: length, type byte, payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        match self {
            Message::AuthRequest(req) => {
                payload.put_u16(req.protocol_version);
                put_string(&mut payload, &req.username);
                put_string(&mut payload, &req.password);
                put_string(&mut payload, &req.database);
            }
            Message::AuthResponse(resp) => {
                payload.put_u8(resp.status);
                payload.put_u64(resp.session_id);
                put_string(&mut payload, &resp.message);
            }
            Message::QueryRequest(req) => {
                payload.put_u64(req.session_id);
                put_string(&mut payload, &req.sql);
            }
            Message::QueryResponse(resp) => {
                payload.put_u8(resp.status);
                payload.put_u8(resp.result_type);
                payload.put_u64(resp.rows_affected);
                payload.put_u32(resp.columns.len() as u32);
                payload.put_u32(resp.rows.len() as u32);
                for column in &resp.columns {
                    put_string(&mut payload, column);
                }
                for row in &resp.rows {
                    for cell in row {
                        put_string(&mut payload, cell);
                    }
                }
                put_string(&mut payload, &resp.current_database);
            }
            Message::ErrorResponse(err) => {
                payload.put_u32(err.code);
                put_string(&mut payload, &err.message);
                put_string(&mut payload, &err.detail);
            }
            _ => {}
        }

        let mut frame = Vec::with_capacity(payload.len() + 5);
        // Length excludes the length field itself.
        frame.extend_from_slice(&((payload.len() as u32 + 1).to_be_bytes()));
        frame.push(self.message_type() as u8);
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode one frame from `bytes`, returning the message and the bytes
    /// consumed. Fails on truncated frames.
    pub fn decode(bytes: &[u8]) -> DbResult<(Self, usize)> {
        if bytes.len() < 4 {
            return Err(DbError::Corruption("truncated frame length".into()));
        }
        let frame_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + frame_len || frame_len == 0 {
            return Err(DbError::Corruption("truncated frame".into()));
        }
        let message_type = MessageType::try_from(bytes[4])?;
        let mut payload = Bytes::copy_from_slice(&bytes[5..4 + frame_len]);

        let message = match message_type {
            MessageType::AuthRequest => Message::AuthRequest(AuthRequest {
                protocol_version: get_u16(&mut payload)?,
                username: get_string(&mut payload)?,
                password: get_string(&mut payload)?,
                database: get_string(&mut payload)?,
            }),
            MessageType::AuthResponse => Message::AuthResponse(AuthResponse {
                status: get_u8(&mut payload)?,
                session_id: get_u64(&mut payload)?,
                message: get_string(&mut payload)?,
            }),
            MessageType::QueryRequest => Message::QueryRequest(QueryRequest {
                session_id: get_u64(&mut payload)?,
                sql: get_string(&mut payload)?,
            }),
            MessageType::QueryResponse => {
                let status = get_u8(&mut payload)?;
                let result_type = get_u8(&mut payload)?;
                let rows_affected = get_u64(&mut payload)?;
                let column_count = get_u32(&mut payload)? as usize;
                let row_count = get_u32(&mut payload)? as usize;
                let mut columns = Vec::with_capacity(column_count);
                for _ in 0..column_count {
                    columns.push(get_string(&mut payload)?);
                }
                let mut rows = Vec::with_capacity(row_count);
                for _ in 0..row_count {
                    let mut row = Vec::with_capacity(column_count);
                    for _ in 0..column_count {
                        row.push(get_string(&mut payload)?);
                    }
                    rows.push(row);
                }
                Message::QueryResponse(QueryResponse {
                    status,
                    result_type,
                    rows_affected,
                    columns,
                    rows,
                    current_database: get_string(&mut payload)?,
                })
            }
            MessageType::ErrorResponse => Message::ErrorResponse(ErrorResponse {
                code: get_u32(&mut payload)?,
                message: get_string(&mut payload)?,
                detail: get_string(&mut payload)?,
            }),
            MessageType::Ping => Message::Ping,
            MessageType::Pong => Message::Pong,
            MessageType::Disconnect => Message::Disconnect,
            MessageType::Begin => Message::Begin,
            MessageType::Commit => Message::Commit,
            MessageType::Rollback => Message::Rollback,
        };
        Ok((message, 4 + frame_len))
    }
}

fn put_string(buf: &mut BytesMut, text: &str) {
    buf.put_u32(text.len() as u32);
    buf.put_slice(text.as_bytes());
}

fn ensure(buf: &Bytes, needed: usize) -> DbResult<()> {
    if buf.remaining() < needed {
        Err(DbError::Corruption("truncated message payload".into()))
    } else {
        Ok(())
    }
}

fn get_u8(buf: &mut Bytes) -> DbResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> DbResult<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes) -> DbResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes) -> DbResult<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

fn get_string(buf: &mut Bytes) -> DbResult<String> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| DbError::Corruption(format!("invalid UTF-8 in message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let encoded = message.encode();
        let (decoded, consumed) = Message::decode(&encoded).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn auth_round_trip() {
        round_trip(Message::AuthRequest(AuthRequest {
            protocol_version: 1,
            username: "admin".into(),
            password: "admin".into(),
            database: "qindb".into(),
        }));
        round_trip(Message::AuthResponse(AuthResponse {
            status: 0,
            session_id: 42,
            message: "welcome".into(),
        }));
    }

    #[test]
    fn query_round_trip() {
        round_trip(Message::QueryRequest(QueryRequest {
            session_id: 7,
            sql: "SELECT * FROM users".into(),
        }));
        round_trip(Message::QueryResponse(QueryResponse {
            status: 0,
            result_type: 1,
            rows_affected: 0,
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec!["1".into(), "Alice".into()],
                vec!["2".into(), "Bob".into()],
            ],
            current_database: "shop".into(),
        }));
    }

    #[test]
    fn error_and_control_round_trips() {
        round_trip(Message::ErrorResponse(ErrorResponse {
            code: 1003,
            message: "permission denied".into(),
            detail: "user 'bob' lacks INSERT on shop.users".into(),
        }));
        for message in [
            Message::Ping,
            Message::Pong,
            Message::Disconnect,
            Message::Begin,
            Message::Commit,
            Message::Rollback,
        ] {
            round_trip(message);
        }
    }

    #[test]
    fn framing_is_big_endian_and_excludes_length() {
        let encoded = Message::Ping.encode();
        // Length 1 (just the type byte), then the type tag.
        assert_eq!(encoded, vec![0, 0, 0, 1, 0x30]);
    }

    #[test]
    fn truncated_frames_fail_cleanly() {
        let mut encoded = Message::QueryRequest(QueryRequest {
            session_id: 1,
            sql: "SELECT 1".into(),
        })
        .encode();
        encoded.truncate(encoded.len() - 3);
        assert!(Message::decode(&encoded).is_err());
    }

    #[test]
    fn unicode_strings_survive() {
        round_trip(Message::QueryRequest(QueryRequest {
            session_id: 9,
            sql: "SELECT 'héllo – 世界'".into(),
        }));
    }
}
