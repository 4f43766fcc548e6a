use std::env;
use std::io::{self, BufRead, StdinLock};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use log::{error, info};
use nix::sys::signal::{signal, SigHandler, Signal};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use seehell::config::Config;
use seehell::history::History;
use seehell::remote::{self, Endpoint};
use seehell::{logging, prompt, Builtins, Executor, Flow, WaitPolicy};
use seehell::{EXIT_INPUT, EXIT_SOCKET, EXIT_USAGE};

#[derive(FromArgs)]
/// Interactive command shell. Runs locally by default, or serves / connects
/// to a shell over a socket.
struct Args {
    /// unix socket to serve on or connect to
    #[argh(option, short = 'u')]
    unix: Option<PathBuf>,
    /// TCP port on 127.0.0.1 to serve on or connect to
    #[argh(option, short = 'p')]
    port: Option<u16>,
    /// accept connections instead of reading the terminal
    #[argh(switch, short = 's')]
    serve: bool,
    /// connect to a serving shell
    #[argh(switch, short = 'c')]
    client: bool,
    /// configuration file (default $SEEHELL_CONFIG, then ~/.config/seehell/config.json)
    #[argh(option)]
    config: Option<PathBuf>,
}

impl Args {
    fn endpoint(&self, config: &Config) -> Endpoint {
        match (self.port, &self.unix) {
            (Some(port), _) => Endpoint::Tcp(port),
            (None, Some(path)) => Endpoint::Unix(path.clone()),
            (None, None) => Endpoint::Unix(config.socket_path.clone()),
        }
    }
}

fn main() {
    let argv: Vec<String> = env::args().collect();
    let name = argv.first().map(String::as_str).unwrap_or("seehell");
    let rest: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();
    let args = match Args::from_args(&[name], &rest) {
        Ok(args) => args,
        Err(EarlyExit { output, status }) => match status {
            Ok(()) => {
                println!("{output}");
                process::exit(0);
            }
            Err(()) => {
                eprintln!("{output}");
                process::exit(EXIT_USAGE);
            }
        },
    };
    process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("seehell: {e:#}");
            return EXIT_USAGE;
        }
    };
    if let Err(e) = logging::init(&config) {
        eprintln!("seehell: {e:#}");
        return EXIT_USAGE;
    }
    let mut builtins = Builtins::new(History::new(config.history_size));
    let endpoint = args.endpoint(&config);

    if args.client {
        return match remote::connect(&endpoint) {
            Ok(()) => 0,
            Err(e) => {
                error!("client on {endpoint} failed: {e}");
                eprintln!("seehell: {endpoint}: {e}");
                EXIT_SOCKET
            }
        };
    }
    if args.serve || args.unix.is_some() || args.port.is_some() {
        return match remote::serve(&endpoint, &mut builtins, config.pipeline_wait) {
            Ok(()) => 0,
            Err(e) => {
                error!("server on {endpoint} failed: {e}");
                eprintln!("seehell: {endpoint}: {e}");
                EXIT_SOCKET
            }
        };
    }
    match interactive(&mut builtins, config.pipeline_wait) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("seehell: {e:#}");
            EXIT_INPUT
        }
    }
}

enum Line {
    Text(String),
    Interrupted,
    Eof,
}

/// Line source: an editor on a terminal, plain standard input otherwise.
enum Input {
    Editor(DefaultEditor),
    Plain(StdinLock<'static>),
}

impl Input {
    fn open() -> Result<Self> {
        if atty::is(atty::Stream::Stdin) {
            Ok(Input::Editor(DefaultEditor::new()?))
        } else {
            Ok(Input::Plain(io::stdin().lock()))
        }
    }

    fn next(&mut self) -> Result<Line> {
        match self {
            Input::Editor(rl) => match rl.readline(&prompt::render()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    Ok(Line::Text(line))
                }
                Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
                Err(ReadlineError::Eof) => Ok(Line::Eof),
                Err(e) => Err(e.into()),
            },
            Input::Plain(stdin) => {
                let mut line = String::new();
                match stdin.read_line(&mut line)? {
                    0 => Ok(Line::Eof),
                    _ => Ok(Line::Text(line)),
                }
            }
        }
    }
}

fn interactive(builtins: &mut Builtins, wait: WaitPolicy) -> Result<()> {
    // children put the default disposition back before exec
    unsafe {
        signal(Signal::SIGINT, SigHandler::SigIgn)?;
    }
    let mut input = Input::open()?;
    let mut executor = Executor::new(wait);
    loop {
        let line = match input.next()? {
            Line::Text(line) => line,
            Line::Interrupted => continue,
            Line::Eof => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        builtins.history_mut().push(line);
        match executor.run_line(line, builtins) {
            Flow::Continue => {}
            Flow::Quit | Flow::Halt => break,
        }
    }
    info!("shell exiting");
    Ok(())
}
