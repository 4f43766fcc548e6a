//! `seehell`: a small interactive command shell with `;`, `|`, `<` and `>`,
//! usable from a terminal or over a socket.

pub mod builtin;
pub mod config;
pub mod exec;
pub mod history;
pub mod logging;
pub mod parse;
pub mod prompt;
pub mod remote;

pub use builtin::{Builtins, Dispatch, Flow};
pub use exec::{Exit, ExecError, Executor, WaitPolicy};
pub use parse::{parse, ParseError, ParsedSegment};

/// Reading the next input line failed.
pub const EXIT_INPUT: i32 = 2;
/// Bad startup flags or configuration.
pub const EXIT_USAGE: i32 = 3;
/// A child could not exec its program.
pub const EXIT_EXEC: i32 = 4;
/// The socket could not be set up or used.
pub const EXIT_SOCKET: i32 = 5;
/// A child could not open a redirection file.
pub const EXIT_REDIRECT: i32 = 6;
