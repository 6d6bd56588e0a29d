//! One command run: spawn, capture both streams, wait, expose the outcome.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::args::{CommandArgs, ProcessOptions, SplitError};
use crate::capture::{self, CaptureStats};
use crate::log::Logger;
use crate::timer;

/// Errors that prevent a command from running to completion.
#[derive(Debug)]
pub enum SpawnError {
    /// The shell-syntax command line could not be tokenized.
    InvalidArgs { line: String, source: SplitError },
    /// Nothing to execute.
    EmptyCommand,
    /// The OS refused to create the process.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Waiting for the process failed.
    Wait {
        command: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnError::InvalidArgs { line, source } => {
                write!(f, "invalid command line '{line}': {source}")
            }
            SpawnError::EmptyCommand => write!(f, "empty command"),
            SpawnError::Spawn { command, source } => {
                write!(f, "failed to spawn '{command}': {source}")
            }
            SpawnError::Wait { command, source } => {
                write!(f, "failed to wait for '{command}': {source}")
            }
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::InvalidArgs { source, .. } => Some(source),
            SpawnError::EmptyCommand => None,
            SpawnError::Spawn { source, .. } => Some(source),
            SpawnError::Wait { source, .. } => Some(source),
        }
    }
}

/// A completed command run.
///
/// Built by [`CommandExecutor::execute`], which only returns after both
/// output streams are closed and the process has exited. The exit code
/// is fixed from then on; an executor is never reused.
#[derive(Debug)]
pub struct CommandExecutor {
    args: CommandArgs,
    args_normalized: Vec<String>,
    exit_code: i32,
    pid: Option<u32>,
    elapsed: Duration,
    stats: CaptureStats,
    logger: Logger,
}

impl CommandExecutor {
    /// Run `args` to completion.
    ///
    /// With a `master` logger every record lands both in this run's own
    /// buffer and in the master's buffer; without one, only in its own.
    pub async fn execute(
        args: impl Into<CommandArgs>,
        master: Option<&Logger>,
        options: &ProcessOptions,
    ) -> Result<Self, SpawnError> {
        let args = args.into();
        let args_normalized = args.normalize().map_err(|source| SpawnError::InvalidArgs {
            line: match &args {
                CommandArgs::Line(line) => line.clone(),
                CommandArgs::Argv(argv) => argv.join(" "),
            },
            source,
        })?;

        let logger = match master {
            Some(master) => Logger::with_master(master),
            None => Logger::new(),
        };

        let joined = args_normalized.join(" ");
        logger.info(format!("Run command: {joined}"));
        let start = Instant::now();

        let mut cmd = build_command(&args, &args_normalized, options)?;
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !options.foreground {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
            command: joined.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::debug!(pid, command = %joined, "process started");

        // Declared after `child`, so it drops first when this future is
        // abandoned mid-run.
        let mut group = GroupGuard {
            pgid: pid
                .filter(|_| !options.foreground)
                .and_then(|pid| i32::try_from(pid).ok())
                .map(Pid::from_raw),
        };

        let stats = capture::capture(child.stdout.take(), child.stderr.take(), &logger).await;

        let status = child.wait().await.map_err(|source| SpawnError::Wait {
            command: joined.clone(),
            source,
        })?;
        group.disarm();
        let exit_code = status
            .code()
            .or_else(|| status.signal().map(|sig| -sig))
            .unwrap_or(-1);

        let elapsed = timer::elapsed(start);
        logger.info(format!("Execution time: {}", timer::format_elapsed(elapsed)));
        tracing::debug!(pid, exit_code, "process exited");

        Ok(Self {
            args,
            args_normalized,
            exit_code,
            pid,
            elapsed,
            stats,
            logger,
        })
    }

    /// Arguments as given.
    pub fn args(&self) -> &CommandArgs {
        &self.args
    }

    /// Arguments as an argument vector.
    pub fn args_normalized(&self) -> &[String] {
        &self.args_normalized
    }

    /// Normalized arguments joined by spaces.
    pub fn command_line(&self) -> String {
        self.args_normalized.join(" ")
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn stdout(&self) -> String {
        self.logger.buffer().stdout()
    }

    pub fn stderr(&self) -> String {
        self.logger.buffer().stderr()
    }

    pub fn line_count_stdout(&self) -> usize {
        self.stats.stdout_lines
    }

    pub fn line_count_stderr(&self) -> usize {
        self.stats.stderr_lines
    }

    /// This run's logger.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Kills the child's whole process group when a run is abandoned, so
/// grandchildren do not outlive it. `kill_on_drop` only reaches the
/// direct child.
struct GroupGuard {
    pgid: Option<Pid>,
}

impl GroupGuard {
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => tracing::debug!(pgid = pgid.as_raw(), "killed abandoned process group"),
                Err(e) => tracing::debug!(pgid = pgid.as_raw(), error = %e, "process group already gone"),
            }
        }
    }
}

fn build_command(
    args: &CommandArgs,
    argv: &[String],
    options: &ProcessOptions,
) -> Result<Command, SpawnError> {
    let mut cmd = if options.shell {
        let mut c = Command::new("sh");
        c.arg("-c");
        match args {
            // Hand the original line to the shell untouched.
            CommandArgs::Line(line) => {
                c.arg(line);
            }
            // Like a shell invocation with positional parameters: the first
            // element is the script, the rest become $0, $1, ...
            CommandArgs::Argv(_) => {
                let (script, rest) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;
                c.arg(script).args(rest);
            }
        }
        c
    } else {
        let (program, rest) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;
        let mut c = Command::new(program);
        c.args(rest);
        c
    };

    if let Some(ref cwd) = options.cwd {
        cmd.current_dir(cwd);
    }
    cmd.envs(&options.env);
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    async fn run(args: impl Into<CommandArgs>) -> CommandExecutor {
        CommandExecutor::execute(args, None, &ProcessOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_args_normalized_from_line() {
        let process = run("ls -l").await;
        assert_eq!(process.args(), &CommandArgs::Line("ls -l".to_string()));
        assert_eq!(process.args_normalized(), ["ls", "-l"]);
        assert_eq!(process.exit_code(), 0);
        assert!(process.pid().is_some());
    }

    #[tokio::test]
    async fn test_stdout_only_process() {
        let process = run(["sh", "-c", "echo 'One line to stdout!'"]).await;
        assert_eq!(process.stdout(), "One line to stdout!");
        assert_eq!(process.line_count_stdout(), 1);
        assert_eq!(process.line_count_stderr(), 0);
        assert_eq!(process.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_stderr_only_process() {
        let process = run(["sh", "-c", "echo 'One line to stderr!' >&2; exit 1"]).await;
        assert_eq!(process.stderr(), "One line to stderr!");
        assert_eq!(process.line_count_stdout(), 0);
        assert_eq!(process.line_count_stderr(), 1);
        assert_eq!(process.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_many_lines_on_both_streams_do_not_deadlock() {
        let body = "i=1\nwhile [ $i -le 2000 ]; do echo \"out $i\"; echo \"err $i\" >&2; i=$((i+1)); done";
        let process = tokio::time::timeout(
            Duration::from_secs(30),
            run(vec!["sh".to_string(), "-c".to_string(), body.to_string()]),
        )
        .await
        .expect("run must not hang");

        assert_eq!(process.line_count_stdout(), 2000);
        assert_eq!(process.line_count_stderr(), 2000);
        let out: Vec<String> = process.stdout().lines().map(String::from).collect();
        let err: Vec<String> = process.stderr().lines().map(String::from).collect();
        for i in 0..2000 {
            assert_eq!(out[i], format!("out {}", i + 1));
            assert_eq!(err[i], format!("err {}", i + 1));
        }
    }

    #[tokio::test]
    async fn test_logs_run_command_and_execution_time() {
        let process = run(["echo", "hi"]).await;
        let records = process.logger().buffer().records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "Run command: echo hi");
        assert_eq!(records[1].message, "hi");
        assert!(records[2].message.starts_with("Execution time: "));
        assert!(records[2].message.ends_with('s'));
    }

    #[tokio::test]
    async fn test_master_logger_receives_records() {
        let master = Logger::new();
        let process =
            CommandExecutor::execute(["echo", "shared"], Some(&master), &ProcessOptions::default())
                .await
                .unwrap();
        assert_eq!(master.buffer().stdout(), "shared");
        assert_eq!(process.stdout(), "shared");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let err = CommandExecutor::execute(
            "nonexistent-binary-xyz --flag",
            None,
            &ProcessOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SpawnError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn 'nonexistent-binary-xyz --flag'"));
    }

    #[tokio::test]
    async fn test_empty_and_invalid_commands() {
        let err = CommandExecutor::execute("", None, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::EmptyCommand));

        let err = CommandExecutor::execute("echo 'open", None, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::InvalidArgs { .. }));
    }

    #[tokio::test]
    async fn test_cwd_and_env_options() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ProcessOptions {
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        options
            .env
            .insert("WATCH_TEST_VALUE".to_string(), "forty-two".to_string());

        let process = CommandExecutor::execute(
            ["sh", "-c", "pwd; echo $WATCH_TEST_VALUE"],
            None,
            &options,
        )
        .await
        .unwrap();
        let stdout = process.stdout();
        let lines: Vec<&str> = stdout.lines().map(|l| l.trim()).collect();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(Path::new(lines[0]).canonicalize().unwrap(), expected);
        assert_eq!(lines[1], "forty-two");
    }

    #[tokio::test]
    async fn test_shell_option_interprets_line() {
        let options = ProcessOptions {
            shell: true,
            ..Default::default()
        };
        let process = CommandExecutor::execute("echo one && echo two >&2; exit 3", None, &options)
            .await
            .unwrap();
        assert_eq!(process.stdout(), "one");
        assert_eq!(process.stderr(), "two");
        assert_eq!(process.exit_code(), 3);
    }

    /// Alive means present in /proc and not a zombie.
    fn is_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // Field 3 is the state; the command name in field 2 may hold spaces.
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_abandoned_run_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleep.pid");
        let script = format!("sleep 37 & echo $! > {}; wait; true", pid_file.display());

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            CommandExecutor::execute(["sh", "-c", script.as_str()], None, &ProcessOptions::default()),
        )
        .await;
        assert!(result.is_err(), "run should still be in flight");

        let sleep_pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..50 {
            alive = is_alive(sleep_pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!alive, "grandchild {sleep_pid} survived the abandoned run");
    }

    #[tokio::test]
    async fn test_finished_run_leaves_detached_children_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        // The background sleep detaches from the pipes, so the run finishes.
        let script = format!(
            "sleep 5 >/dev/null 2>&1 & echo $! > {}",
            pid_file.display()
        );
        let process = run(["sh", "-c", script.as_str()]).await;
        assert_eq!(process.exit_code(), 0);

        let bg_pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(is_alive(bg_pid));
        let _ = nix::sys::signal::kill(Pid::from_raw(bg_pid), Signal::SIGKILL);
    }

    #[tokio::test]
    async fn test_stdin_is_inherited() {
        let ours = std::fs::read_link("/proc/self/fd/0").unwrap();
        let process = run(["readlink", "/proc/self/fd/0"]).await;
        assert_eq!(Path::new(&process.stdout()), ours);
    }

    #[tokio::test]
    async fn test_foreground_option_keeps_caller_process_group() {
        let options = ProcessOptions {
            foreground: true,
            ..Default::default()
        };
        let pgid_script = ["sh", "-c", "cut -d' ' -f5 /proc/$$/stat"];
        let process = CommandExecutor::execute(pgid_script, None, &options)
            .await
            .unwrap();
        let child_pgid: i32 = process.stdout().trim().parse().unwrap();
        assert_eq!(child_pgid, nix::unistd::getpgrp().as_raw());

        let process = run(pgid_script).await;
        let child_pgid: u32 = process.stdout().trim().parse().unwrap();
        assert_eq!(Some(child_pgid), process.pid());
    }

    #[tokio::test]
    async fn test_signal_exit_code_is_negative() {
        let process = run(["sh", "-c", "kill -TERM $$"]).await;
        assert_eq!(process.exit_code(), -15);
    }
}
