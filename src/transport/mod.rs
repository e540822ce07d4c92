//! NUL/SOH-framed request/response transport over TCP (spec §4.3).
//!
//! Requests are terminated with `.` followed by a NUL byte; a missing
//! trailing `.` is appended automatically. Responses are read until either
//! a NUL or a SOH byte, depending on which peer is on the other end: the
//! generator ends replies on NUL, the solver's B-parser subprocess ends on
//! SOH. There is no multi-message interleaving on a single socket.

use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

const READ_CHUNK: usize = 4096;

/// The byte a peer uses to terminate its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// `\x00`, used by the generator and by `probcli` when writing back to
    /// its controlling socket from the `halt`/`setrand`/etc. requests.
    Nul,
    /// `\x01`, used by `probcli` for solve replies.
    Soh,
    /// `\n`, used by the B-parser subprocess.
    Newline,
}

impl Terminator {
    fn byte(self) -> u8 {
        match self {
            Terminator::Nul => 0x00,
            Terminator::Soh => 0x01,
            Terminator::Newline => b'\n',
        }
    }
}

/// A single framed request/response TCP connection.
#[derive(Debug)]
pub struct FramedSocket {
    stream: TcpStream,
    terminator: Terminator,
}

impl FramedSocket {
    /// Connects to `localhost:<port>` and applies `timeout` to every
    /// subsequent read.
    pub fn connect(port: u16, terminator: Terminator, timeout: Duration) -> std::io::Result<Self> {
        let stream = TcpStream::connect(("localhost", port))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(FramedSocket { stream, terminator })
    }

    /// Sends a request, appending a trailing `.` if missing, followed by a
    /// NUL framing byte.
    pub fn send(&mut self, message: &str) -> std::io::Result<()> {
        let mut framed = String::with_capacity(message.len() + 2);
        framed.push_str(message);
        if !framed.ends_with('.') {
            framed.push('.');
        }
        self.stream.write_all(framed.as_bytes())?;
        self.stream.write_all(&[0x00])?;
        self.stream.flush()
    }

    /// Sends raw bytes verbatim, with no `.`/NUL framing. Used by the
    /// B-parser protocol, which frames its own request as
    /// `predicate\n<text>\n` and terminates its reply on `\n` instead.
    pub fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    /// Reads bytes until the configured terminator is seen, stripping it
    /// before returning the decoded text.
    pub fn receive(&mut self) -> std::io::Result<String> {
        let mut data = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        let terminator = self.terminator.byte();
        loop {
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed socket before sending a terminator",
                ));
            }
            data.extend_from_slice(&chunk[..n]);
            if let Some(pos) = data.iter().position(|&b| b == terminator) {
                data.truncate(pos);
                break;
            }
        }
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Convenience wrapper: send a request, then read the reply.
    pub fn request(&mut self, message: &str) -> std::io::Result<String> {
        self.send(message)?;
        self.receive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn request_appends_dot_and_nul_and_strips_terminator() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if buf.contains(&0x00) {
                    break;
                }
            }
            assert_eq!(buf, b"generate.\x00");
            stream.write_all(b"Raw: foo\x00").unwrap();
        });

        let mut socket =
            FramedSocket::connect(port, Terminator::Nul, Duration::from_secs(2)).unwrap();
        let reply = socket.request("generate").unwrap();
        assert_eq!(reply, "Raw: foo");
        server.join().unwrap();
    }

    #[test]
    fn soh_terminator_reads_until_soh_byte() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(b"yes(bindings)\x01").unwrap();
        });

        let mut socket =
            FramedSocket::connect(port, Terminator::Soh, Duration::from_secs(2)).unwrap();
        let reply = socket.request("solve.").unwrap();
        assert_eq!(reply, "yes(bindings)");
        server.join().unwrap();
    }
}
