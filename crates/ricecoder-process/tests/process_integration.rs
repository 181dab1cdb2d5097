//! Integration tests for single processes: output, routing, exit codes,
//! timeouts, input and environment
#![cfg(unix)]

use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use ricecoder_process::{self as process, Channel, OutputLine, ProcessError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn is_gone(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None) == Err(Errno::ESRCH)
}

#[tokio::test]
async fn lines_come_out_in_order() {
    init_tracing();
    let mut handle = process::start("seq", ["1", "500"]).unwrap();
    let lines: Vec<String> = handle.stream().try_collect().await.unwrap();

    let expected: Vec<String> = (1..=500).map(|n| n.to_string()).collect();
    assert_eq!(lines, expected);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn channels_are_tagged() {
    let mut handle = process::shell("echo out; echo err >&2").start().unwrap();
    let lines: Vec<OutputLine> = handle.lines().try_collect().await.unwrap();

    assert!(lines.contains(&OutputLine::new(Channel::Stdout, "out")));
    assert!(lines.contains(&OutputLine::new(Channel::Stderr, "err")));
    assert_eq!(lines.len(), 2);
}

#[tokio::test]
async fn stderr_redirected_to_stdout() {
    let mut handle = process::shell("echo out; echo err >&2")
        .redirect_stderr_to_stdout()
        .start()
        .unwrap();
    let lines: Vec<OutputLine> = handle.lines().try_collect().await.unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(OutputLine::is_stdout));
}

#[tokio::test]
async fn stdout_redirected_to_stderr() {
    let mut handle = process::shell("echo out; echo err >&2")
        .redirect_stdout_to_stderr()
        .start()
        .unwrap();
    let lines: Vec<OutputLine> = handle.lines().try_collect().await.unwrap();

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(OutputLine::is_stderr));
    assert_eq!(lines.iter().map(ToString::to_string).filter(|l| l.starts_with("2:")).count(), 2);
}

#[tokio::test]
async fn suppressed_channel_yields_nothing() {
    let mut handle = process::shell("for i in 1 2 3; do echo noise >&2; done; echo kept")
        .no_stderr()
        .start()
        .unwrap();
    assert_eq!(handle.get().await.unwrap(), "kept");

    let mut handle = process::shell("echo hidden; echo shown >&2")
        .no_stdout()
        .start()
        .unwrap();
    let lines: Vec<OutputLine> = handle.lines().try_collect().await.unwrap();
    assert_eq!(lines, vec![OutputLine::new(Channel::Stderr, "shown")]);
}

#[tokio::test]
async fn rejected_exit_code_fails_get() {
    let err = process::start("sh", ["-c", "echo partial; exit 79"])
        .unwrap()
        .get()
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), Some(79));
    assert_eq!(err.args().unwrap(), ["sh", "-c", "echo partial; exit 79"]);
    assert_eq!(err.to_string(), "Command 'sh -c echo partial; exit 79' exited with code 79");
}

#[tokio::test]
async fn allowed_exit_codes_succeed() {
    let output = process::command("sh")
        .args(["-c", "echo fine; exit 79"])
        .allowed_exit_code(79)
        .start()
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(output, "fine");

    let mut handle = process::start("sh", ["-c", "exit 3"])
        .unwrap()
        .with_allowed_exit_codes([1, 2, 3]);
    assert_eq!(handle.get().await.unwrap(), "");

    let mut handle = process::start("sh", ["-c", "exit 200"]).unwrap().with_any_exit_code();
    assert!(handle.is_successful().await.unwrap());
}

#[tokio::test]
async fn close_after_last_raises_once_at_end_of_stream() {
    let mut handle = process::start("sh", ["-c", "echo a; echo b; exit 3"]).unwrap();
    let items: Vec<_> = handle.stream().collect().await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_deref().unwrap(), "a");
    assert_eq!(items[1].as_deref().unwrap(), "b");
    assert_eq!(items[2].as_ref().unwrap_err().exit_code(), Some(3));

    assert!(handle.is_closed());
    assert!(handle.close().await.is_ok());
}

#[tokio::test]
async fn deferred_check_raises_on_close() {
    let mut handle = process::start("sh", ["-c", "echo a; echo b; exit 3"])
        .unwrap()
        .without_close_after_last();

    let lines: Vec<String> = handle.stream().try_collect().await.unwrap();
    assert_eq!(lines, vec!["a", "b"]);
    assert!(!handle.is_closed());

    let err = handle.close().await.unwrap_err();
    assert_eq!(err.exit_code(), Some(3));
    assert!(handle.close().await.is_ok());
}

#[tokio::test]
async fn shell_failure_names_the_default_shell() {
    let mut handle = process::shell("echo a; exit 3")
        .start()
        .unwrap()
        .without_close_after_last();

    let err = handle.get().await.unwrap_err();
    assert_eq!(err.to_string(), "Command 'sh -c echo a; exit 3' exited with code 3");
}

#[tokio::test]
async fn stopping_early_checks_nothing_until_close() {
    let mut handle = process::start("sh", ["-c", "echo a; echo b; exit 1"]).unwrap();
    {
        let mut lines = handle.stream();
        assert_eq!(lines.next().await.unwrap().unwrap(), "a");
    }
    assert!(!handle.is_closed());
    assert_eq!(handle.close().await.unwrap_err().exit_code(), Some(1));
}

#[tokio::test]
async fn timeout_kills_the_process() {
    init_tracing();
    let mut handle = process::start("sleep", ["3600"])
        .unwrap()
        .with_timeout(Duration::from_millis(50));
    let pid = handle.pid();

    let started = Instant::now();
    let err = handle.stream().try_collect::<Vec<_>>().await.unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err}");
    assert!(err.exit_code().is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(is_gone(pid));
    assert!(handle.close().await.is_ok());
}

#[tokio::test]
async fn timeout_applies_to_byte_streams() {
    let mut handle = process::command("sh")
        .args(["-c", "sleep 3600"])
        .timeout(Duration::from_millis(20))
        .start()
        .unwrap();
    let pid = handle.pid();

    let err = handle.stream_bytes().try_collect::<Vec<_>>().await.unwrap_err();
    assert!(matches!(err, ProcessError::Timeout { .. }));
    assert!(is_gone(pid));
}

#[tokio::test]
async fn timeout_kills_grandchildren() {
    let mut handle = process::shell("sleep 3600 & wait")
        .timeout(Duration::from_millis(50))
        .start()
        .unwrap();

    assert!(handle.join().await.unwrap_err().is_timeout());
    assert!(handle.exit_code().await.unwrap_err().is_timeout());
}

#[tokio::test]
async fn natural_exit_is_not_a_timeout_when_read_late() {
    let mut handle = process::command("echo")
        .arg("hi")
        .timeout(Duration::from_millis(100))
        .start()
        .unwrap();

    assert_eq!(handle.exit_code().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.get().await.unwrap(), "hi");
}

#[tokio::test]
async fn unobserved_natural_exit_is_not_a_timeout() {
    let mut handle = process::shell("echo one; echo two")
        .timeout(Duration::from_millis(50))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.get().await.unwrap(), "one\ntwo");
}

#[tokio::test]
async fn buffered_output_streams_quickly_after_exit_code() {
    let mut handle = process::start("seq", ["1", "300000"]).unwrap();
    assert_eq!(handle.exit_code().await.unwrap(), 0);

    let started = Instant::now();
    let lines: Vec<String> = handle.stream().try_collect().await.unwrap();
    assert_eq!(lines.len(), 300_000);
    assert_eq!(lines.last().map(String::as_str), Some("300000"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn exited_process_with_lingering_grandchild_closes() {
    let started = Instant::now();
    let output = process::shell("sleep 3 & echo done").start().unwrap().get().await.unwrap();

    assert_eq!(output, "done");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn input_lines_reach_the_process() {
    let output = process::start("cat", Vec::<String>::new())
        .unwrap()
        .input_lines(["x"])
        .get()
        .await
        .unwrap();
    assert_eq!(output, "x");
}

#[tokio::test]
async fn input_stream_reaches_the_process() {
    let input = futures::stream::iter(vec!["hello".to_string(), "world".to_string()]);
    let output = process::start("cat", Vec::<String>::new())
        .unwrap()
        .input_stream(input)
        .get()
        .await
        .unwrap();
    assert_eq!(output, "hello\nworld");
}

#[tokio::test]
async fn interactive_input_keeps_stdin_open() {
    let mut handle = process::start("sh", ["-ec", "read INPUT; echo \"$INPUT\""])
        .unwrap()
        .without_close_after_last()
        .input_lines_without_closing(["hello world"]);

    assert_eq!(handle.get().await.unwrap(), "hello world");
}

#[tokio::test]
async fn try_get_separates_output_and_failure() {
    let result = process::start("sh", ["-c", "echo out; exit 2"]).unwrap().try_get().await;
    assert!(!result.is_success());
    assert!(result.output().is_none());
    assert_eq!(result.error().and_then(ProcessError::exit_code), Some(2));

    let result = process::start("echo", ["ok"]).unwrap().try_get().await;
    assert!(result.is_success());
    assert_eq!(result.output(), Some("ok"));
    assert!(result.error().is_none());
}

#[tokio::test]
async fn try_get_keeps_output_when_check_is_deferred() {
    let result = process::start("sh", ["-c", "echo out; exit 2"])
        .unwrap()
        .without_close_after_last()
        .try_get()
        .await;

    assert_eq!(result.output(), Some("out"));
    assert_eq!(result.error().and_then(ProcessError::exit_code), Some(2));
}

#[tokio::test]
async fn environment_can_be_cleared_and_set() {
    let env = which::which("env").unwrap();
    let output = process::command(env.to_string_lossy())
        .clear_environment()
        .env("A", "1")
        .env("B", "2")
        .start()
        .unwrap()
        .get()
        .await
        .unwrap();

    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.join("\n"), "A=1\nB=2");
}

#[tokio::test]
async fn shell_sees_configured_environment() {
    let output = process::shell("echo \"$GREETING\"")
        .env("GREETING", "bonjour")
        .start()
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(output, "bonjour");
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let output = process::command("pwd")
        .working_dir(dir.path())
        .start()
        .unwrap()
        .get()
        .await
        .unwrap();

    assert_eq!(
        std::fs::canonicalize(output).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
}

#[tokio::test]
async fn multiline_argument_runs_as_script() {
    let output = process::command("sh")
        .arg("-c")
        .multiline_arg(["echo one", "echo two"])
        .start()
        .unwrap()
        .get()
        .await
        .unwrap();
    assert_eq!(output, "one\ntwo");
}

#[tokio::test]
async fn missing_shell_is_distinguished() {
    let err = process::shell("echo hi")
        .with_shell_program("/definitely/not/a/shell", "-c")
        .start()
        .unwrap_err();
    assert!(matches!(err, ProcessError::ShellNotFound { .. }));

    let err = process::start("/definitely/not/a/program", ["x"]).unwrap_err();
    assert!(matches!(err, ProcessError::SpawnFailed { .. }));
}

#[tokio::test]
async fn write_to_copies_stdout_bytes() {
    let mut sink = Vec::new();
    process::shell("printf 'abc'; printf 'ignored' >&2")
        .start()
        .unwrap()
        .write_to(&mut sink)
        .await
        .unwrap();
    assert_eq!(sink, b"abc");
}

#[tokio::test]
async fn builder_changes_do_not_affect_started_process() {
    let config = process::command("echo").arg("first");
    let mut handle = config.start().unwrap();
    let _changed = config.arg("second");

    assert_eq!(handle.get().await.unwrap(), "first");
}
