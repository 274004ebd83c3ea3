//! Transfer collaborator backed by an external program
//!
//! The program receives the recipients as a JSON array on stdin and the
//! credential in the `FLEETLB_PAYOUT_SECRET` environment variable. It prints
//! one JSON [`TransferDetail`] per executed transfer on stdout. Lines are
//! read as they are printed and recorded in the [`TransferLog`], so a run
//! that is killed or exits non-zero still reports what it broadcast.

use crate::config::Credential;
use crate::transfer::{Recipient, TransferDetail, TransferError, TransferExecutor, TransferLog};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

pub const SECRET_ENV_VAR: &str = "FLEETLB_PAYOUT_SECRET";

#[derive(Debug, Clone)]
pub struct ScriptTransfer {
    program: PathBuf,
    args: Vec<String>,
}

impl ScriptTransfer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ScriptTransfer {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

fn parse_line(line: &str) -> Option<TransferDetail> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<TransferDetail>(line) {
        Ok(detail) => {
            debug!(address = %detail.address, tx = %detail.tx_hash, "transfer reported");
            Some(detail)
        }
        Err(e) => {
            warn!(line = %line, error = %e, "unparseable transfer line");
            None
        }
    }
}

#[async_trait]
impl TransferExecutor for ScriptTransfer {
    async fn execute_payout(
        &self,
        credential: &Credential,
        recipients: &[Recipient],
        log: &TransferLog,
    ) -> Result<Vec<TransferDetail>, TransferError> {
        let input = serde_json::to_vec(recipients)
            .map_err(|e| TransferError::new(format!("failed to encode recipients: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(SECRET_ENV_VAR, credential.expose())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransferError::new(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let write_input = async move {
            match stdin {
                // dropping stdin closes it so the program sees EOF
                Some(mut stdin) => match stdin.write_all(&input).await {
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(()),
                },
                None => Ok(()),
            }
        };

        let read_transfers = async move {
            let mut completed = Vec::new();
            let Some(stdout) = stdout else {
                return completed;
            };
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(detail) = parse_line(&line) {
                            log.record(detail.clone());
                            completed.push(detail);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "failed to read transfer program output");
                        break;
                    }
                }
            }
            completed
        };

        let read_errors = async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                if let Err(e) = stderr.read_to_string(&mut buf).await {
                    warn!(error = %e, "failed to read transfer program stderr");
                }
            }
            buf
        };

        let (written, completed, stderr) = tokio::join!(write_input, read_transfers, read_errors);

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(TransferError::partial(
                    format!("failed to wait for transfer program: {}", e),
                    completed,
                ))
            }
        };

        if let Err(e) = written {
            return Err(TransferError::partial(
                format!("failed to write recipients: {}", e),
                completed,
            ));
        }

        if status.success() {
            Ok(completed)
        } else {
            let reason = stderr.trim();
            let message = if reason.is_empty() {
                format!("transfer program exited with {}", status)
            } else {
                format!("transfer program exited with {}: {}", status, reason)
            };
            Err(TransferError::partial(message, completed))
        }
    }
}
