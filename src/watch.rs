//! One watched service session: run commands, then report.

use std::time::Instant;

use crate::args::{CommandArgs, ProcessOptions};
use crate::executor::{CommandExecutor, SpawnError};
use crate::log::Logger;
use crate::message::{self, Message, MessageParams, PerfValue, PerformanceData, ValidationError};
use crate::report::Reporter;
use crate::timer;

pub const DEFAULT_SERVICE_NAME: &str = "command_watcher";

/// Errors surfaced by a [`Watch`] session.
#[derive(Debug)]
pub enum WatchError {
    Spawn(SpawnError),
    /// The command exited with a code the caller did not allow. A
    /// CRITICAL report has already been dispatched.
    CommandFailure { command: String, exit_code: i32 },
    Validation(ValidationError),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Spawn(e) => write!(f, "{e}"),
            WatchError::CommandFailure { command, exit_code } => write!(
                f,
                "the command '{command}' exits with a non-zero return code ({exit_code})"
            ),
            WatchError::Validation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatchError::Spawn(e) => Some(e),
            WatchError::CommandFailure { .. } => None,
            WatchError::Validation(e) => Some(e),
        }
    }
}

impl From<SpawnError> for WatchError {
    fn from(e: SpawnError) -> Self {
        WatchError::Spawn(e)
    }
}

impl From<ValidationError> for WatchError {
    fn from(e: ValidationError) -> Self {
        WatchError::Validation(e)
    }
}

/// Session-wide settings.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub service_name: String,
    pub service_display_name: Option<String>,
    /// Fail `run` on a disallowed non-zero exit code.
    pub raise_exceptions: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_display_name: None,
            raise_exceptions: true,
        }
    }
}

/// Per-run settings for [`Watch::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Also record the command's output in the session transcript.
    pub log: bool,
    /// Non-zero exit codes that do not count as a failure.
    pub ignore_exit_codes: Vec<i32>,
    pub process: ProcessOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            log: true,
            ignore_exit_codes: Vec::new(),
            process: ProcessOptions::default(),
        }
    }
}

/// Caller-supplied part of a report. The session fills in the rest.
#[derive(Debug, Clone, Default)]
pub struct ReportFields {
    pub custom_message: Option<String>,
    pub prefix: Option<String>,
    pub body: Option<String>,
    pub performance_data: PerformanceData,
}

pub struct Watch {
    hostname: String,
    service_name: String,
    service_display_name: Option<String>,
    raise_exceptions: bool,
    logger: Logger,
    processes: Vec<CommandExecutor>,
    reporter: Reporter,
    started: Instant,
}

impl Watch {
    pub fn new(options: WatchOptions, reporter: Reporter) -> Self {
        let logger = Logger::new();
        let hostname = message::hostname().to_string();
        logger.info(format!("Hostname: {hostname}"));
        tracing::debug!(
            service = %options.service_name,
            channels = ?reporter.channel_names(),
            "watch session started"
        );
        Self {
            hostname,
            service_name: options.service_name,
            service_display_name: options.service_display_name,
            raise_exceptions: options.raise_exceptions,
            logger,
            processes: Vec::new(),
            reporter,
            started: Instant::now(),
        }
    }

    /// Run one command to completion and record it in the session.
    ///
    /// When the exit code is non-zero, not in `ignore_exit_codes`, and the
    /// session raises, a CRITICAL report goes out first and then
    /// [`WatchError::CommandFailure`] is returned. Spawn failures are
    /// returned without a report and the command is not recorded.
    pub async fn run(
        &mut self,
        args: impl Into<CommandArgs>,
        options: &RunOptions,
    ) -> Result<&CommandExecutor, WatchError> {
        let master = options.log.then_some(&self.logger);
        let process = match CommandExecutor::execute(args, master, &options.process).await {
            Ok(process) => process,
            Err(e) => {
                self.logger.error(e.to_string());
                return Err(e.into());
            }
        };

        let exit_code = process.exit_code();
        let command = process.command_line();
        let index = self.processes.len();
        self.processes.push(process);

        if self.raise_exceptions
            && exit_code != 0
            && !options.ignore_exit_codes.contains(&exit_code)
        {
            let custom_message = format!(
                "CommandFailure: The command '{command}' exits with a non-zero return code ({exit_code})."
            );
            self.logger.critical(custom_message.clone());
            self.report(
                message::Status::Critical,
                ReportFields {
                    custom_message: Some(custom_message),
                    ..Default::default()
                },
            )
            .await?;
            return Err(WatchError::CommandFailure { command, exit_code });
        }

        Ok(&self.processes[index])
    }

    /// Dispatch a report stamped with the session's service, transcript
    /// and command list.
    pub async fn report(
        &self,
        status: impl Into<u8>,
        fields: ReportFields,
    ) -> Result<Message, WatchError> {
        let params = MessageParams {
            status: Some(status.into()),
            service_name: Some(self.service_name.clone()),
            service_display_name: self.service_display_name.clone(),
            custom_message: fields.custom_message,
            prefix: fields.prefix,
            body: fields.body,
            performance_data: fields.performance_data,
            processes: self
                .processes
                .iter()
                .map(|p| p.args_normalized().to_vec())
                .collect(),
            log_records: Some(self.logger.buffer().all_records()),
        };
        let message = self.reporter.report(params).await?;
        self.logger.debug(message.to_string());
        Ok(message)
    }

    /// [`Watch::report`] plus an `execution_time` metric covering the
    /// whole session.
    pub async fn final_report(
        &self,
        status: impl Into<u8>,
        mut fields: ReportFields,
    ) -> Result<Message, WatchError> {
        let execution_time = timer::format_elapsed(timer::elapsed(self.started));
        self.logger
            .info(format!("Overall execution time: {execution_time}"));
        fields
            .performance_data
            .insert("execution_time".to_string(), PerfValue::Text(execution_time));
        self.report(status, fields).await
    }

    /// Captured stdout of every logged run, in order.
    pub fn stdout(&self) -> String {
        self.logger.buffer().stdout()
    }

    pub fn stderr(&self) -> String {
        self.logger.buffer().stderr()
    }

    pub fn processes(&self) -> &[CommandExecutor] {
        &self.processes
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}
