//! Pipeline execution: one forked child per external command, wired up with
//! files and pipes, run strictly left to right.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execvp, fork, pipe2, ForkResult, Pid};
use serde::Deserialize;
use thiserror::Error;

use crate::builtin::{Dispatch, Flow};
use crate::parse::{parse, Continuation, ParseError, ParsedSegment};
use crate::{EXIT_EXEC, EXIT_REDIRECT};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("pipe: {0}")]
    Pipe(#[source] Errno),
    #[error("fork: {0}")]
    Fork(#[source] Errno),
    #[error("wait: {0}")]
    Wait(#[source] Errno),
    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),
    #[error("pipe with no command before it")]
    EmptyPipeStage,
    #[error("{path}: {source}")]
    Redirect { path: String, #[source] source: io::Error },
    #[error("capturing built-in output: {0}")]
    Capture(#[source] io::Error),
}

/// When the parent collects the children it forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitPolicy {
    /// Wait for each child right after forking it.
    #[default]
    Each,
    /// Fork every stage of a `|` group, then wait for the whole group.
    Group,
}

/// How a child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal(i32),
}

/// Which sides of the current command are connected to pipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    None,
    RightOnly,
    LeftOnly,
    Both,
}

impl Linkage {
    pub fn new(left: bool, right: bool) -> Self {
        match (left, right) {
            (false, false) => Linkage::None,
            (false, true) => Linkage::RightOnly,
            (true, false) => Linkage::LeftOnly,
            (true, true) => Linkage::Both,
        }
    }

    pub fn has_left(self) -> bool {
        matches!(self, Linkage::LeftOnly | Linkage::Both)
    }

    pub fn has_right(self) -> bool {
        matches!(self, Linkage::RightOnly | Linkage::Both)
    }
}

/// Both ends of a fresh pipe. Each end closes when dropped.
#[derive(Debug)]
pub struct PipePair {
    read: OwnedFd,
    write: OwnedFd,
}

impl PipePair {
    pub fn new() -> Result<Self, ExecError> {
        // dup2 onto 0/1 drops the flag, so only the originals close on exec
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)?;
        Ok(PipePair { read, write })
    }

    /// Hands out the (read, write) halves.
    pub fn split(self) -> (OwnedFd, OwnedFd) {
        (self.read, self.write)
    }
}

/// Where a child's standard stream comes from or goes to.
#[derive(Debug)]
enum Stream {
    Inherit,
    Path(String, CString),
    Fd(OwnedFd),
}

impl Stream {
    fn path(path: &str) -> Result<Self, ExecError> {
        let c = CString::new(path).map_err(|_| ExecError::InvalidArgument(path.to_string()))?;
        Ok(Stream::Path(path.to_string(), c))
    }

    // Child side only.
    fn attach(self, slot: RawFd, flags: OFlag, fallback: Option<RawFd>) -> Result<(), ExecError> {
        let io_err = |path: &str, e: Errno| ExecError::Redirect { path: path.to_string(), source: io::Error::from(e) };
        match self {
            Stream::Inherit => {
                if let Some(fd) = fallback {
                    dup2(fd, slot).map_err(|e| io_err("dup2", e))?;
                }
            }
            Stream::Path(name, c) => {
                let fd = open(c.as_c_str(), flags, Mode::from_bits_truncate(0o644)).map_err(|e| io_err(&name, e))?;
                dup2(fd, slot).map_err(|e| io_err(&name, e))?;
                let _ = close(fd);
            }
            Stream::Fd(owned) => {
                dup2(owned.as_raw_fd(), slot).map_err(|e| io_err("dup2", e))?;
            }
        }
        Ok(())
    }
}

/// Everything a child needs between fork and exec, prepared in the parent.
#[derive(Debug)]
struct Launch {
    argv: Vec<CString>,
    linkage: Linkage,
    stdin: Stream,
    stdout: Stream,
}

impl Launch {
    /// `left` is the read end feeding this command, `right` the write end it
    /// feeds. Files named by the segment take precedence over either pipe;
    /// an unused pipe end is dropped here and so never reaches the child.
    fn new(segment: &ParsedSegment<'_>, left: Option<OwnedFd>, right: Option<OwnedFd>) -> Result<Self, ExecError> {
        let argv = segment
            .arguments
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|_| ExecError::InvalidArgument(a.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        let linkage = Linkage::new(left.is_some(), right.is_some());
        let stdin = match (&segment.redirect_in, left) {
            (Some(path), _) => Stream::path(path)?,
            (None, Some(fd)) if linkage.has_left() => Stream::Fd(fd),
            _ => Stream::Inherit,
        };
        let stdout = match (&segment.redirect_out, right) {
            (Some(path), _) => Stream::path(path)?,
            (None, Some(fd)) if linkage.has_right() => Stream::Fd(fd),
            _ => Stream::Inherit,
        };
        Ok(Launch { argv, linkage, stdin, stdout })
    }

    /// Rewires the standard streams and replaces the process image. Only
    /// ever called in a freshly forked child; never returns.
    fn exec(self, fallback: Option<RawFd>) -> ! {
        // the Rust runtime ignores SIGPIPE and the shell ignores SIGINT;
        // ignored dispositions survive exec
        unsafe {
            let _ = signal(Signal::SIGINT, SigHandler::SigDfl);
            let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);
        }
        if let Some(fd) = fallback {
            let _ = dup2(fd, libc::STDERR_FILENO);
        }
        let Launch { argv, stdin, stdout, .. } = self;
        if let Err(e) = stdin.attach(libc::STDIN_FILENO, OFlag::O_RDONLY, None) {
            child_exit(&e.to_string(), EXIT_REDIRECT);
        }
        let out_flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC;
        if let Err(e) = stdout.attach(libc::STDOUT_FILENO, out_flags, fallback) {
            child_exit(&e.to_string(), EXIT_REDIRECT);
        }
        let err = match execvp(&argv[0], &argv) {
            Ok(never) => match never {},
            Err(e) => e,
        };
        child_exit(&format!("{}: {}", argv[0].to_string_lossy(), err), EXIT_EXEC)
    }
}

fn child_exit(message: &str, code: i32) -> ! {
    let _ = writeln!(io::stderr(), "seehell: {message}");
    unsafe { libc::_exit(code) }
}

fn spawn(launch: Launch, fallback: Option<RawFd>) -> Result<Pid, ExecError> {
    let _ = io::stdout().flush();
    match unsafe { fork() }.map_err(ExecError::Fork)? {
        ForkResult::Child => launch.exec(fallback),
        ForkResult::Parent { child } => {
            debug!("spawned {} {:?} as {child}", launch.argv[0].to_string_lossy(), launch.linkage);
            // dropping the launch closes the parent's copies of the pipe ends
            Ok(child)
        }
    }
}

fn wait_for(pid: Pid) -> Result<Exit, ExecError> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(Exit::Code(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(Exit::Signal(sig as i32)),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(ExecError::Wait(e)),
        }
    }
}

/// Runs input lines. Holds no state between lines beyond the last exit status.
#[derive(Debug)]
pub struct Executor {
    wait: WaitPolicy,
    capture: Option<File>,
    last_exit: Option<Exit>,
}

impl Executor {
    pub fn new(wait: WaitPolicy) -> Self {
        Executor { wait, capture: None, last_exit: None }
    }

    /// Sends everything that would reach the terminal (children's stdout and
    /// stderr, built-in output, error reports) to `file` instead.
    pub fn capturing(mut self, file: File) -> Self {
        self.capture = Some(file);
        self
    }

    /// Status of the most recently collected child.
    pub fn last_exit(&self) -> Option<Exit> {
        self.last_exit
    }

    /// Executes every segment of `line`, returning once all of them have
    /// finished. Errors are reported and end the line; they never escape.
    pub fn run_line(&mut self, line: &str, builtins: &mut dyn Dispatch) -> Flow {
        let mut group = Vec::new();
        let flow = match self.drive(line, builtins, &mut group) {
            Ok(flow) => flow,
            Err(e) => {
                self.report(&e);
                Flow::Continue
            }
        };
        // an aborted group may still have children running
        for pid in group {
            self.settle(pid);
        }
        flow
    }

    fn drive(&mut self, line: &str, builtins: &mut dyn Dispatch, group: &mut Vec<Pid>) -> Result<Flow, ExecError> {
        let mut rest = line;
        let mut left: Option<OwnedFd> = None;
        loop {
            let segment = parse(rest)?;
            let piped = segment.continuation == Continuation::Piped;
            match segment.program() {
                None if piped => return Err(ExecError::EmptyPipeStage),
                None => left = None,
                Some(name) if builtins.recognizes(name) => {
                    // built-ins never read standard input
                    drop(left.take());
                    let (flow, produced) = self.run_builtin(&segment, piped, builtins)?;
                    if flow != Flow::Continue {
                        return Ok(flow);
                    }
                    left = produced;
                }
                Some(_) => {
                    let (next_left, right) = match piped {
                        true => {
                            let (read, write) = PipePair::new()?.split();
                            (Some(read), Some(write))
                        }
                        false => (None, None),
                    };
                    let launch = Launch::new(&segment, left.take(), right)?;
                    let pid = spawn(launch, self.capture.as_ref().map(|f| f.as_raw_fd()))?;
                    match self.wait {
                        WaitPolicy::Each => self.collect(pid)?,
                        WaitPolicy::Group => group.push(pid),
                    }
                    // the right pipe of this command is the left pipe of the next
                    left = next_left;
                }
            }
            if !piped {
                while let Some(pid) = group.pop() {
                    self.collect(pid)?;
                }
            }
            match segment.remainder {
                Some(next) => rest = next,
                None => return Ok(Flow::Continue),
            }
        }
    }

    /// Runs a built-in; when piped, its output is returned as the readable
    /// input of the next command.
    ///
    /// A redirect that cannot be opened fails only this built-in, as it
    /// would fail only the child for an external command.
    fn run_builtin(&self, segment: &ParsedSegment<'_>, piped: bool, builtins: &mut dyn Dispatch) -> Result<(Flow, Option<OwnedFd>), ExecError> {
        let mut stderr = io::stderr();
        let mut err_file = self.capture.as_ref();
        let err: &mut dyn Write = match err_file.as_mut() {
            Some(file) => file,
            None => &mut stderr,
        };
        if let Some(path) = &segment.redirect_out {
            let opened = OpenOptions::new().write(true).create(true).truncate(true).open(path);
            let mut file = match opened {
                Ok(file) => file,
                Err(source) => {
                    self.report(&ExecError::Redirect { path: path.clone(), source });
                    return Ok((Flow::Continue, None));
                }
            };
            return Ok((builtins.run(&segment.arguments, &mut file, err), None));
        }
        if piped {
            let mut file = tempfile::tempfile().map_err(ExecError::Capture)?;
            let flow = builtins.run(&segment.arguments, &mut file, err);
            file.seek(SeekFrom::Start(0)).map_err(ExecError::Capture)?;
            return Ok((flow, Some(OwnedFd::from(file))));
        }
        let mut stdout = io::stdout();
        let mut out_file = self.capture.as_ref();
        let out: &mut dyn Write = match out_file.as_mut() {
            Some(file) => file,
            None => &mut stdout,
        };
        Ok((builtins.run(&segment.arguments, out, err), None))
    }

    fn collect(&mut self, pid: Pid) -> Result<(), ExecError> {
        let exit = wait_for(pid)?;
        debug!("{pid} finished: {exit:?}");
        self.last_exit = Some(exit);
        Ok(())
    }

    fn settle(&mut self, pid: Pid) {
        if let Err(e) = self.collect(pid) {
            warn!("could not collect {pid}: {e}");
        }
    }

    fn report(&self, err: &ExecError) {
        debug!("reported: {err}");
        match self.capture.as_ref() {
            Some(mut file) => {
                let _ = writeln!(file, "seehell: {err}");
            }
            None => eprintln!("seehell: {err}"),
        }
    }
}
