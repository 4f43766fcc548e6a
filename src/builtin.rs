//! Commands handled inside the shell process.

use std::env;
use std::io::Write;
use std::path::PathBuf;

use log::debug;

use crate::history::History;

/// What the caller should do after a line (or a built-in) ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the current session.
    Quit,
    /// Stop the shell.
    Halt,
}

/// The executor's view of built-ins.
pub trait Dispatch {
    /// Whether `name` is handled in-process.
    fn recognizes(&self, name: &str) -> bool;
    /// Runs a recognized built-in, writing its output to `out` and its
    /// diagnostics to `err`.
    fn run(&mut self, args: &[String], out: &mut dyn Write, err: &mut dyn Write) -> Flow;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinKind { Halt, Quit, Help, History, Cd }

impl BuiltinKind {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "halt" => Some(BuiltinKind::Halt),
            "quit" => Some(BuiltinKind::Quit),
            "help" => Some(BuiltinKind::Help),
            "history" => Some(BuiltinKind::History),
            "cd" => Some(BuiltinKind::Cd),
            _ => None,
        }
    }
}

const HELP: &str = "\
seehell - interactive command shell

Built-in commands:
    help            print this message
    halt            stop the shell
    quit            leave the current session
    history         list previously entered lines
    cd [dir]        change the working directory (default $HOME)

Syntax:
    cmd1 ; cmd2     run cmd2 once cmd1 has finished
    cmd1 | cmd2     feed cmd1's output into cmd2
    cmd < file      read standard input from file
    cmd > file      write standard output to file
    \"a b\"           one argument containing a space
    \\c              take the character c literally
    # text          comment until the end of the line
";

/// The stock built-in set, owning the session's history.
#[derive(Debug)]
pub struct Builtins {
    history: History,
}

impl Builtins {
    pub fn new(history: History) -> Self {
        Builtins { history }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    fn run_history(&self, out: &mut dyn Write) {
        for (n, line) in self.history.iter() {
            let _ = writeln!(out, "{n:>5}  {line}");
        }
    }

    fn run_cd(args: &[String], err: &mut dyn Write) {
        let target = match args.get(1) {
            Some(dir) => PathBuf::from(dir),
            None => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => {
                    let _ = writeln!(err, "cd: HOME not set");
                    return;
                }
            },
        };
        match env::set_current_dir(&target) {
            Ok(()) => debug!("cd {}", target.display()),
            Err(e) => {
                let _ = writeln!(err, "cd: {}: {e}", target.display());
            }
        }
    }
}

impl Dispatch for Builtins {
    fn recognizes(&self, name: &str) -> bool {
        BuiltinKind::lookup(name).is_some()
    }

    fn run(&mut self, args: &[String], out: &mut dyn Write, err: &mut dyn Write) -> Flow {
        let Some(kind) = args.first().and_then(|name| BuiltinKind::lookup(name)) else {
            return Flow::Continue;
        };
        let flow = match kind {
            BuiltinKind::Halt => Flow::Halt,
            BuiltinKind::Quit => Flow::Quit,
            BuiltinKind::Help => {
                let _ = out.write_all(HELP.as_bytes());
                Flow::Continue
            }
            BuiltinKind::History => {
                self.run_history(out);
                Flow::Continue
            }
            BuiltinKind::Cd => {
                Self::run_cd(args, err);
                Flow::Continue
            }
        };
        let _ = out.flush();
        let _ = err.flush();
        flow
    }
}
