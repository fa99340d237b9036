//! Outbound sender that drives the Messages app through `osascript`.

use crate::exec::run_with_timeout;
use crate::transport::{MessageSender, TransportError, TransportResult};
use log::{error, info};
use std::time::{Duration, Instant};

const OSASCRIPT_PROGRAM: &str = "osascript";

/// Sends text to a handle by running a generated AppleScript.
#[derive(Debug, Clone)]
pub struct OsascriptSender {
    program: String,
    timeout: Duration,
}

impl OsascriptSender {
    /// Sender whose `osascript` runs are killed after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: OSASCRIPT_PROGRAM.to_string(),
            timeout,
        }
    }

    /// Overrides the interpreter binary. Used to stub `osascript` in tests.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl MessageSender for OsascriptSender {
    fn send(&self, recipient: &str, text: &str) -> TransportResult<()> {
        let started_at = Instant::now();
        let script = build_send_script(recipient, text);
        let output = run_with_timeout(
            &self.program,
            &["-e".to_string(), script],
            None,
            self.timeout,
        )?;

        if !output.status.success() {
            let stderr = output.stderr.trim().to_string();
            error!(
                "event=message_send module=transport status=error duration_ms={} exit={:?}",
                started_at.elapsed().as_millis(),
                output.status.code()
            );
            return Err(TransportError::SendFailed {
                recipient: recipient.to_string(),
                message: if stderr.is_empty() {
                    format!("osascript exited with {:?}", output.status.code())
                } else {
                    stderr
                },
            });
        }

        info!(
            "event=message_send module=transport status=ok duration_ms={} chars={}",
            started_at.elapsed().as_millis(),
            text.chars().count()
        );
        Ok(())
    }
}

/// Escapes a value for an AppleScript string literal.
pub fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// AppleScript that sends `text` to `recipient` over iMessage.
pub fn build_send_script(recipient: &str, text: &str) -> String {
    format!(
        "tell application \"Messages\"\n\
         \tactivate\n\
         \tdelay 1\n\
         \tset targetService to id of 1st account whose service type = iMessage\n\
         \tset targetBuddy to participant \"{}\" of account id targetService\n\
         \tsend \"{}\" to targetBuddy\n\
         end tell",
        escape_applescript(recipient),
        escape_applescript(text)
    )
}

#[cfg(test)]
mod tests {
    use super::{build_send_script, escape_applescript, OsascriptSender};
    use crate::transport::{MessageSender, TransportError};
    use std::time::Duration;

    #[test]
    fn escapes_backslashes_before_quotes() {
        assert_eq!(escape_applescript(r#"say "hi" \ bye"#), r#"say \"hi\" \\ bye"#);
    }

    #[test]
    fn script_embeds_escaped_recipient_and_text() {
        let script = build_send_script("+15550100", "Unclear: \"xyz\"");
        assert!(script.contains("participant \"+15550100\""));
        assert!(script.contains("send \"Unclear: \\\"xyz\\\"\" to targetBuddy"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_interpreter_is_reported_as_send_failure() {
        let sender = OsascriptSender::new(Duration::from_secs(5)).with_program("false");
        let err = sender.send("+15550100", "hello").unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));

        let sender = OsascriptSender::new(Duration::from_secs(5)).with_program("true");
        assert!(sender.send("+15550100", "hello").is_ok());
    }
}
