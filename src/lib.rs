//! Run an external command, capture both of its output streams, and report
//! the outcome to e-mail, Icinga and an audible beep.

pub mod args;
pub mod capture;
pub mod channels;
pub mod config;
pub mod executor;
pub mod log;
pub mod message;
pub mod report;
pub mod timer;
pub mod watch;

pub use args::{CommandArgs, ProcessOptions};
pub use config::{load_config, load_config_or_default, Config, ConfigError};
pub use executor::{CommandExecutor, SpawnError};
pub use log::{Level, LogBuffer, LogRecord, Logger};
pub use message::{Message, MessageParams, PerfValue, PerformanceData, Status, ValidationError};
pub use report::{Channel, ChannelError, Reporter};
pub use watch::{ReportFields, RunOptions, Watch, WatchError, WatchOptions};
