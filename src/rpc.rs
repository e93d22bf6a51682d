//! Length-prefixed TCP command transport.
//!
//! Framing per message: 8 bytes of big-endian length, then that many
//! payload bytes. A payload is `command-bytes | separator | content`
//! where the separator is the first ASCII `|`. Replies use the same
//! framing with command `success` or `error`.
//!
//! The server handles one client at a time; commands of a connection are
//! processed strictly in receive order and each completes before the
//! next frame is read. Handler dispatch runs inline on the accept
//! thread.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, info, warn};

use crate::errors::{DebuggerError, Result};

const SEPARATOR: u8 = b'|';

/// Upper bound on accepted frame sizes.
const MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

/// One wire message: a command name plus opaque content bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: String,
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(command: impl Into<String>, content: Vec<u8>) -> Self {
        Message {
            command: command.into(),
            content,
        }
    }

    pub fn success(content: Vec<u8>) -> Self {
        Message::new("success", content)
    }

    pub fn error(diagnostic: impl Display) -> Self {
        Message::new("error", diagnostic.to_string().into_bytes())
    }

    /// `command | separator | content`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.command.len() + 1 + self.content.len());
        data.extend_from_slice(self.command.as_bytes());
        data.push(SEPARATOR);
        data.extend_from_slice(&self.content);
        data
    }

    /// Splits a payload at the first separator.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let separator = data.iter().position(|b| *b == SEPARATOR).ok_or_else(|| {
            DebuggerError::MalformedCommand("payload has no command separator".to_string())
        })?;
        let command = std::str::from_utf8(&data[..separator])
            .map_err(|_| DebuggerError::MalformedCommand("command is not UTF-8".to_string()))?
            .to_string();
        Ok(Message {
            command,
            content: data[separator + 1..].to_vec(),
        })
    }
}

/// Writes one frame: big-endian length, then the payload.
pub fn write_frame(stream: &mut impl Write, payload: &[u8]) -> Result<()> {
    let length = payload.len() as u64;
    stream.write_all(&length.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the connection
/// (EOF or an empty frame).
pub fn read_frame(stream: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 8];
    match stream.read_exact(&mut length_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let length = u64::from_be_bytes(length_bytes);
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_FRAME_LEN {
        return Err(DebuggerError::MalformedCommand(format!(
            "frame of {length} bytes exceeds the limit"
        )));
    }

    let mut payload = vec![0u8; length as usize];
    match stream.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            warn!("connection closed in the middle of a frame");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// A named command handler: content bytes in, reply content bytes out.
pub type Handler = Box<dyn FnMut(&[u8]) -> Result<Vec<u8>> + Send>;

/// Framed socket server dispatching named handlers.
pub struct RpcServer {
    handlers: HashMap<String, Handler>,
}

impl RpcServer {
    /// A fresh server with the built-in `ping` handler registered.
    pub fn build() -> Self {
        let mut server = RpcServer {
            handlers: HashMap::new(),
        };
        server.register(
            "ping",
            Box::new(|content| {
                Ok(if content.is_empty() {
                    b"pong".to_vec()
                } else {
                    content.to_vec()
                })
            }),
        );
        server
    }

    pub fn register(&mut self, command: impl Into<String>, handler: Handler) {
        self.handlers.insert(command.into(), handler);
    }

    /// Binds `port` on all interfaces and serves clients until the
    /// listener fails. One client at a time; a newly accepted connection
    /// is handled only after the current one closes.
    pub fn serve(&mut self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        self.serve_listener(listener)
    }

    pub fn serve_listener(&mut self, listener: TcpListener) -> Result<()> {
        info!(
            "rpc server listening on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );

        loop {
            let (stream, peer) = match listener.accept() {
                Ok(connection) => connection,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accepting a client failed: {e}");
                    return Err(e.into());
                }
            };
            info!("client connected: {peer}");
            self.handle_client(stream);
            info!("client disconnected");
        }
    }

    /// Serves one established connection until it closes.
    pub fn handle_client(&mut self, mut stream: TcpStream) {
        loop {
            let payload = match read_frame(&mut stream) {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(e) => {
                    warn!("reading a frame failed: {e}");
                    break;
                }
            };

            let reply = self.dispatch(&payload);
            if let Err(e) = write_frame(&mut stream, &reply.to_bytes()) {
                error!("sending the reply failed: {e}");
                break;
            }
        }
    }

    fn dispatch(&mut self, payload: &[u8]) -> Message {
        let message = match Message::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("{e}");
                return Message::error(e);
            }
        };
        debug!("command: {}", message.command);

        let Some(handler) = self.handlers.get_mut(&message.command) else {
            error!("unknown command: {}", message.command);
            return Message::error(format!("unknown command: {}", message.command));
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&message.content))) {
            Ok(Ok(content)) => {
                debug!("command {} succeeded ({} reply bytes)", message.command, content.len());
                Message::success(content)
            }
            Ok(Err(e)) => {
                error!("command {} failed: {e}", message.command);
                Message::error(e)
            }
            Err(_) => {
                error!("command {} panicked", message.command);
                Message::error("the command handler panicked")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(message: &Message) -> Message {
        Message::from_bytes(&message.to_bytes()).unwrap()
    }

    #[test]
    fn test_message_roundtrip() {
        for message in [
            Message::new("ping", Vec::new()),
            Message::new("read_memory", b"0x1000 64".to_vec()),
            Message::new("write_memory", vec![0, 1, 2, SEPARATOR, 4]),
            Message::success(b"done".to_vec()),
            Message::error("it broke"),
        ] {
            assert_eq!(roundtrip(&message), message);
        }
    }

    #[test]
    fn test_message_without_separator_is_malformed() {
        assert!(matches!(
            Message::from_bytes(b"no separator here"),
            Err(DebuggerError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = Message::new("ping", b"hello".to_vec()).to_bytes();
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).unwrap();

        // 8 bytes of big-endian length prefix the payload
        assert_eq!(wire.len(), 8 + payload.len());
        assert_eq!(u64::from_be_bytes(wire[..8].try_into().unwrap()), payload.len() as u64);

        let read = read_frame(&mut Cursor::new(wire)).unwrap().unwrap();
        assert_eq!(read, payload);
    }

    #[test]
    fn test_read_frame_handles_eof_and_empty() {
        assert!(read_frame(&mut Cursor::new(Vec::<u8>::new())).unwrap().is_none());
        let empty_frame = 0u64.to_be_bytes().to_vec();
        assert!(read_frame(&mut Cursor::new(empty_frame)).unwrap().is_none());
    }

    #[test]
    fn test_dispatch_ping_and_unknown() {
        let mut server = RpcServer::build();

        let reply = server.dispatch(&Message::new("ping", Vec::new()).to_bytes());
        assert_eq!(reply.command, "success");
        assert_eq!(reply.content, b"pong");

        let reply = server.dispatch(&Message::new("ping", b"echo".to_vec()).to_bytes());
        assert_eq!(reply.content, b"echo");

        let reply = server.dispatch(&Message::new("nope", Vec::new()).to_bytes());
        assert_eq!(reply.command, "error");
        assert!(String::from_utf8_lossy(&reply.content).contains("unknown command"));
    }

    #[test]
    fn test_dispatch_catches_handler_panics() {
        let mut server = RpcServer::build();
        server.register("boom", Box::new(|_| panic!("kaboom")));
        let reply = server.dispatch(&Message::new("boom", Vec::new()).to_bytes());
        assert_eq!(reply.command, "error");
    }

    #[test]
    fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut server = RpcServer::build();
            let _ = server.serve_listener(listener);
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        write_frame(&mut stream, &Message::new("ping", b"over tcp".to_vec()).to_bytes()).unwrap();
        let payload = read_frame(&mut stream).unwrap().unwrap();
        let reply = Message::from_bytes(&payload).unwrap();
        assert_eq!(reply.command, "success");
        assert_eq!(reply.content, b"over tcp");
    }
}
