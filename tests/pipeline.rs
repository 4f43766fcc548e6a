use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use seehell::history::History;
use seehell::{Builtins, Executor, Exit, Flow, WaitPolicy};

// forking from many test threads at once makes failures hard to read
static SERIAL: Mutex<()> = Mutex::new(());

struct Outcome {
    output: String,
    exit: Option<Exit>,
    flow: Flow,
}

fn run_with(line: &str, wait: WaitPolicy) -> Outcome {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut capture = tempfile::tempfile().expect("tempfile");
    let mut executor = Executor::new(wait).capturing(capture.try_clone().unwrap());
    let mut builtins = Builtins::new(History::new(8));
    let flow = executor.run_line(line, &mut builtins);
    capture.seek(SeekFrom::Start(0)).unwrap();
    let mut output = String::new();
    capture.read_to_string(&mut output).unwrap();
    Outcome { output, exit: executor.last_exit(), flow }
}

fn run(line: &str) -> Outcome {
    run_with(line, WaitPolicy::Each)
}

macro_rules! output_test {
    ($name:ident, $line:expr, $expected:expr) => {
        #[test]
        fn $name() {
            let got = run($line);
            assert_eq!(got.output, $expected, "line: {}", $line);
            assert_eq!(got.flow, Flow::Continue);
        }
    };
}

output_test!(single_command, "echo hello", "hello\n");
output_test!(pipe_feeds_next_command, "echo hello | tr a-z A-Z", "HELLO\n");
output_test!(sequence_runs_in_order, "echo one ; echo two ; echo three", "one\ntwo\nthree\n");
output_test!(quoted_argument_keeps_spaces, "echo \"a   b\"", "a   b\n");
output_test!(comment_is_ignored, "echo shown # echo hidden", "shown\n");
output_test!(empty_segments_are_skipped, "; ; echo after", "after\n");
output_test!(builtin_output_is_piped, "help | grep -c history", "1\n");
output_test!(sequence_after_pipe, "echo a | tr a b ; echo c", "b\nc\n");
output_test!(blank_line_does_nothing, "   ", "");

#[test]
fn redirect_out_then_in() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("f.txt");
    let line = format!("echo x > {0} ; cat < {0}", file.display());
    let got = run(&line);
    assert_eq!(got.output, "x\n");
    assert_eq!(fs::read_to_string(&file).unwrap(), "x\n");
    assert_eq!(got.exit, Some(Exit::Code(0)));
}

#[test]
fn three_stage_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("letters.txt");
    fs::write(&file, "b\na\nc\n").unwrap();
    let got = run(&format!("cat {} | sort | head -n 2", file.display()));
    assert_eq!(got.output, "a\nb\n");
}

#[test]
fn redirect_out_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out.txt");
    fs::write(&file, "something much longer than the new content\n").unwrap();
    run(&format!("echo short > {}", file.display()));
    assert_eq!(fs::read_to_string(&file).unwrap(), "short\n");
}

#[test]
fn redirect_wins_over_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    fs::write(&input, "from file\n").unwrap();
    let got = run(&format!("echo from pipe | cat < {}", input.display()));
    assert_eq!(got.output, "from file\n");
}

#[test]
fn builtin_output_honours_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("help.txt");
    let got = run(&format!("help > {}", file.display()));
    assert_eq!(got.output, "");
    assert!(fs::read_to_string(&file).unwrap().contains("history"));
}

#[test]
fn missing_program_reports_and_continues() {
    let got = run("no-such-program-here ; echo next");
    assert!(got.output.contains("no-such-program-here"), "{}", got.output);
    assert!(got.output.ends_with("next\n"), "{}", got.output);
}

#[test]
fn missing_program_exits_with_exec_failure() {
    let got = run("no-such-program-here");
    assert_eq!(got.exit, Some(Exit::Code(4)));
}

#[test]
fn unreadable_redirect_exits_with_redirect_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.txt");
    let got = run(&format!("cat < {}", missing.display()));
    assert_eq!(got.exit, Some(Exit::Code(6)));
    assert!(got.output.contains("absent.txt"), "{}", got.output);
}

#[test]
fn child_status_is_recorded() {
    assert_eq!(run("false").exit, Some(Exit::Code(1)));
    assert_eq!(run("true").exit, Some(Exit::Code(0)));
}

#[test]
fn parse_error_abandons_rest_of_line() {
    let got = run("echo first ; echo \"open ; echo never");
    assert!(got.output.starts_with("first\n"), "{}", got.output);
    assert!(got.output.contains("unbalanced quote"), "{}", got.output);
    assert!(!got.output.contains("never"));
}

#[test]
fn trailing_pipe_runs_nothing() {
    let got = run("echo lost |");
    assert!(!got.output.contains("lost"), "{}", got.output);
    assert!(got.output.contains("pipe with no command"), "{}", got.output);
    assert_eq!(got.exit, None);
}

#[test]
fn empty_pipe_stage_aborts() {
    let got = run("; | echo lost");
    assert!(!got.output.contains("lost"), "{}", got.output);
}

#[test]
fn halt_stops_the_line() {
    let got = run("echo before ; halt ; echo after");
    assert_eq!(got.flow, Flow::Halt);
    assert_eq!(got.output, "before\n");
}

#[test]
fn quit_is_reported() {
    assert_eq!(run("quit").flow, Flow::Quit);
}

#[test]
fn group_wait_streams_large_output() {
    // well past any pipe buffer, so the stages must overlap
    let got = run_with("seq 1 200000 | wc -l", WaitPolicy::Group);
    assert_eq!(got.output.trim(), "200000");
    assert_eq!(got.exit, Some(Exit::Code(0)));
}

#[test]
fn group_wait_matches_each_for_small_pipes() {
    let each = run_with("echo abc | tr a-c x-z ; echo done", WaitPolicy::Each);
    let group = run_with("echo abc | tr a-c x-z ; echo done", WaitPolicy::Group);
    assert_eq!(each.output, "xyz\ndone\n");
    assert_eq!(group.output, each.output);
}

#[test]
fn pipe_into_empty_stage_runs_nothing() {
    for line in ["echo lost | ; echo b", "echo lost | # c", "echo lost |   ;"] {
        let got = run(line);
        assert_eq!(got.output, "seehell: pipe with no command after it\n", "line: {line}");
        assert_eq!(got.exit, None, "line: {line}");
    }
}

#[test]
fn builtin_redirect_failure_fails_only_that_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("no-dir").join("help.txt");
    let got = run(&format!("help > {} ; echo next", target.display()));
    assert_eq!(got.flow, Flow::Continue);
    assert!(got.output.starts_with("seehell: "), "{}", got.output);
    assert!(got.output.contains("help.txt"), "{}", got.output);
    assert!(got.output.ends_with("next\n"), "{}", got.output);
}

#[test]
fn cd_errors_skip_the_redirect_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("cd.txt");
    let got = run(&format!("cd /definitely/not/a/dir > {}", file.display()));
    assert!(got.output.starts_with("cd: /definitely/not/a/dir:"), "{}", got.output);
    assert_eq!(fs::read_to_string(&file).unwrap(), "");
}

#[test]
fn cd_errors_skip_the_pipe() {
    let got = run("cd /definitely/not/a/dir | wc -c");
    assert!(got.output.starts_with("cd: /definitely/not/a/dir:"), "{}", got.output);
    assert_eq!(got.output.lines().last().map(str::trim), Some("0"));
}
