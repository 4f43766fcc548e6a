//! Running the shell across a stream socket: the accepting side executes
//! lines and answers with their captured output, the initiating side relays
//! a terminal to it.

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use log::{debug, info};
use nix::errno::Errno;
use nix::unistd::read;

use crate::builtin::{Builtins, Flow};
use crate::exec::{Executor, WaitPolicy};

/// Largest single read from either side of the connection.
pub const MESSAGE_MAX: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    /// A port on the loopback interface.
    Tcp(u16),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(port) => write!(f, "127.0.0.1:{port}"),
        }
    }
}

/// Accepts connections one at a time until a client runs `halt`.
pub fn serve(endpoint: &Endpoint, builtins: &mut Builtins, wait: WaitPolicy) -> io::Result<()> {
    match endpoint {
        Endpoint::Unix(path) => {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    return Err(e);
                }
            }
            let listener = UnixListener::bind(path)?;
            info!("listening on {endpoint}");
            let served = accept_loop(listener.incoming(), builtins, wait);
            let _ = fs::remove_file(path);
            served
        }
        Endpoint::Tcp(port) => {
            let listener = TcpListener::bind(("127.0.0.1", *port))?;
            info!("listening on {endpoint}");
            accept_loop(listener.incoming(), builtins, wait)
        }
    }
}

fn accept_loop<S, I>(incoming: I, builtins: &mut Builtins, wait: WaitPolicy) -> io::Result<()>
where
    S: Read + Write,
    I: Iterator<Item = io::Result<S>>,
{
    for conn in incoming {
        let mut stream = match conn {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        info!("client connected");
        match session(&mut stream, builtins, wait) {
            Ok(Flow::Halt) => {
                info!("halted by client");
                return Ok(());
            }
            Ok(_) => info!("client disconnected"),
            // a broken connection only ends that session
            Err(e) => info!("client dropped: {e}"),
        }
    }
    Ok(())
}

fn session<S: Read + Write>(stream: &mut S, builtins: &mut Builtins, wait: WaitPolicy) -> io::Result<Flow> {
    let mut buf = [0u8; MESSAGE_MAX];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(Flow::Quit),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        pending.extend_from_slice(&buf[..n]);
        while let Some(line) = next_line(&mut pending) {
            let line = String::from_utf8_lossy(&line).into_owned();
            info!("request: {}", line.trim());
            let (reply, flow) = respond(&line, builtins, wait)?;
            stream.write_all(&reply)?;
            stream.flush()?;
            if flow != Flow::Continue {
                return Ok(flow);
            }
        }
    }
}

/// Splits the first newline-terminated line off `pending`. An overlong
/// unterminated run is handed out whole.
fn next_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    match pending.iter().position(|&b| b == b'\n') {
        Some(end) => {
            let mut line: Vec<u8> = pending.drain(..=end).collect();
            line.pop();
            Some(line)
        }
        None if pending.len() >= MESSAGE_MAX => Some(std::mem::take(pending)),
        None => None,
    }
}

/// Runs one request line and returns everything it printed. The reply is
/// never empty.
pub fn respond(line: &str, builtins: &mut Builtins, wait: WaitPolicy) -> io::Result<(Vec<u8>, Flow)> {
    let line = line.trim();
    let mut capture = tempfile::tempfile()?;
    let flow = match line.is_empty() {
        true => Flow::Continue,
        false => {
            builtins.history_mut().push(line);
            let mut executor = Executor::new(wait).capturing(capture.try_clone()?);
            executor.run_line(line, builtins)
        }
    };
    capture.seek(SeekFrom::Start(0))?;
    let mut reply = Vec::new();
    capture.read_to_end(&mut reply)?;
    if reply.is_empty() {
        reply.push(b' ');
    }
    Ok((reply, flow))
}

/// A connected stream the client can half-close.
pub trait Channel: Read + Write + AsRawFd {
    fn close_write(&self) -> io::Result<()>;
}

impl Channel for UnixStream {
    fn close_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

impl Channel for TcpStream {
    fn close_write(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

/// Relays stdin to the server and its replies to stdout until the server
/// closes the connection.
pub fn connect(endpoint: &Endpoint) -> io::Result<()> {
    debug!("connecting to {endpoint}");
    match endpoint {
        Endpoint::Unix(path) => relay(UnixStream::connect(path)?),
        Endpoint::Tcp(port) => relay(TcpStream::connect(("127.0.0.1", *port))?),
    }
}

/// Wire form of one terminal line.
pub fn outbound(line: &[u8]) -> Vec<u8> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut msg = match line.is_empty() {
        true => b" ".to_vec(),
        false => line.to_vec(),
    };
    msg.push(b'\n');
    msg
}

fn relay<C: Channel>(mut chan: C) -> io::Result<()> {
    let stdin_fd = libc::STDIN_FILENO;
    let mut stdin_open = true;
    let mut typed: Vec<u8> = Vec::new();
    let mut buf = [0u8; MESSAGE_MAX];
    let mut stdout = io::stdout();
    loop {
        let events = (libc::POLLIN | libc::POLLHUP | libc::POLLERR) as i16;
        let mut pfds = vec![libc::pollfd { fd: chan.as_raw_fd(), events, revents: 0 }];
        if stdin_open {
            pfds.push(libc::pollfd { fd: stdin_fd, events, revents: 0 });
        }
        let rc = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }
        if pfds[0].revents != 0 {
            let n = match chan.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                debug!("server closed the connection");
                return Ok(());
            }
            stdout.write_all(&buf[..n])?;
            stdout.flush()?;
        }
        if stdin_open && pfds[1].revents != 0 {
            let n = match read(stdin_fd, &mut buf) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if !typed.is_empty() {
                    chan.write_all(&outbound(&std::mem::take(&mut typed)))?;
                }
                chan.close_write()?;
                stdin_open = false;
                continue;
            }
            typed.extend_from_slice(&buf[..n]);
            while let Some(end) = typed.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = typed.drain(..=end).collect();
                chan.write_all(&outbound(&line[..end]))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::History;

    #[test]
    fn outbound_terminates_lines_and_fills_blanks() {
        assert_eq!(outbound(b"ls -l"), b"ls -l\n");
        assert_eq!(outbound(b""), b" \n");
        assert_eq!(outbound(b"\r"), b" \n");
        assert_eq!(outbound(b"pwd\r"), b"pwd\n");
    }

    #[test]
    fn next_line_waits_for_newline() {
        let mut pending = b"echo a\necho".to_vec();
        assert_eq!(next_line(&mut pending), Some(b"echo a".to_vec()));
        assert_eq!(next_line(&mut pending), None);
        pending.extend_from_slice(b" b\n");
        assert_eq!(next_line(&mut pending), Some(b"echo b".to_vec()));
        assert!(pending.is_empty());
    }

    #[test]
    fn overlong_line_is_taken_whole() {
        let mut pending = vec![b'x'; MESSAGE_MAX];
        assert_eq!(next_line(&mut pending).map(|l| l.len()), Some(MESSAGE_MAX));
        assert!(pending.is_empty());
    }

    #[test]
    fn blank_request_gets_a_single_space() {
        let mut b = Builtins::new(History::new(4));
        let (reply, flow) = respond("   ", &mut b, WaitPolicy::Each).unwrap();
        assert_eq!(reply, b" ");
        assert_eq!(flow, Flow::Continue);
        assert!(b.history().is_empty());
    }

    #[test]
    fn builtin_output_is_captured() {
        let mut b = Builtins::new(History::new(4));
        let (reply, flow) = respond("history\n", &mut b, WaitPolicy::Each).unwrap();
        assert_eq!(String::from_utf8(reply).unwrap(), "    1  history\n");
        assert_eq!(flow, Flow::Continue);
        assert_eq!(respond("halt", &mut b, WaitPolicy::Each).unwrap().1, Flow::Halt);
    }
}
