use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::message::{Message, Status};
use crate::report::{Channel, ChannelError};

/// A frequency (Hz) and length (ms) pair passed to `beep`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f64,
    pub length: f64,
}

/// Fixed tone per status, from a high C8 for OK down to C1 for UNKNOWN.
pub fn tone(status: Status) -> Tone {
    let (frequency, length) = match status {
        Status::Ok => (4186.01, 50.0),
        Status::Warning => (261.626, 100.0),
        Status::Critical => (65.4064, 150.0),
        Status::Unknown => (32.7032, 200.0),
    };
    Tone { frequency, length }
}

/// Audible status signal through the external `beep` utility.
#[derive(Debug, Clone)]
pub struct BeepChannel {
    program: PathBuf,
}

impl BeepChannel {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate `beep` on `PATH`.
    pub fn detect() -> Option<Self> {
        find_in_path("beep").map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for a tone, e.g. `-f 4186.01 -l 50.0`.
    pub fn args(tone: Tone) -> Vec<String> {
        vec![
            "-f".to_string(),
            format!("{:?}", tone.frequency),
            "-l".to_string(),
            format!("{:?}", tone.length),
        ]
    }
}

#[async_trait]
impl Channel for BeepChannel {
    fn name(&self) -> &str {
        "beep"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let status = Command::new(&self.program)
            .args(Self::args(tone(message.status())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(ChannelError::Transport(format!(
                "{} exited with {status}",
                self.program.display()
            )));
        }
        Ok(())
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageParams;

    #[test]
    fn test_tone_per_status() {
        assert_eq!(tone(Status::Ok), Tone { frequency: 4186.01, length: 50.0 });
        assert_eq!(tone(Status::Warning), Tone { frequency: 261.626, length: 100.0 });
        assert_eq!(tone(Status::Critical), Tone { frequency: 65.4064, length: 150.0 });
        assert_eq!(tone(Status::Unknown), Tone { frequency: 32.7032, length: 200.0 });
    }

    #[test]
    fn test_args_format_floats() {
        assert_eq!(
            BeepChannel::args(tone(Status::Ok)),
            vec!["-f", "4186.01", "-l", "50.0"]
        );
        assert_eq!(
            BeepChannel::args(tone(Status::Unknown)),
            vec!["-f", "32.7032", "-l", "200.0"]
        );
    }

    #[test]
    fn test_find_in_path_finds_sh() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-binary-xyz").is_none());
    }

    #[tokio::test]
    async fn test_send_runs_program_with_tone() {
        // `true` accepts any arguments and succeeds.
        let channel = BeepChannel::new(find_in_path("true").unwrap());
        let message = Message::new(MessageParams {
            status: Some(2),
            ..Default::default()
        })
        .unwrap();
        channel.send(&message).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_failures() {
        let channel = BeepChannel::new(find_in_path("false").unwrap());
        let err = channel.send(&Message::default()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));

        let channel = BeepChannel::new("/nonexistent/beep");
        let err = channel.send(&Message::default()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
