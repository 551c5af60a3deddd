use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{KitabError, Result};
use crate::models::HistoryTurn;
use crate::query::Protocol;

/// Output of a running query subprocess, in arrival order per stream.
///
/// `Exited` is always the last update for a process.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryUpdate {
    Stdout(String),
    Stderr(String),
    Exited(Option<i32>),
}

/// How the terminal client launches one query.
#[derive(Debug, Clone)]
pub struct QueryCommand {
    program: PathBuf,
    base_args: Vec<String>,
}

impl QueryCommand {
    /// Run this binary's own `query` subcommand.
    pub fn current_exe(protocol: Protocol) -> Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            base_args: vec![
                "query".to_string(),
                "--protocol".to_string(),
                protocol.as_arg().to_string(),
            ],
        })
    }

    /// Run an external command line, split on whitespace.
    pub fn external(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| KitabError::Validation("Query command is empty".to_string()))?;

        Ok(Self {
            program: PathBuf::from(program),
            base_args: parts.collect(),
        })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Full argument list for one question.
    pub fn args_for(&self, question: &str, history: &[HistoryTurn]) -> Result<Vec<String>> {
        let mut args = self.base_args.clone();
        args.push("--stream".to_string());
        if !history.is_empty() {
            args.push("--history".to_string());
            args.push(serde_json::to_string(history)?);
        }
        args.push("--".to_string());
        args.push(question.to_string());
        Ok(args)
    }

    /// Spawn the process and forward its output to `updates`.
    pub fn spawn(
        &self,
        question: &str,
        history: &[HistoryTurn],
        updates: UnboundedSender<QueryUpdate>,
    ) -> Result<()> {
        let args = self.args_for(question, history)?;
        tracing::info!(program = %self.program.display(), "Spawning query process");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KitabError::Protocol(format!(
                    "Failed to start {}: {e}",
                    self.program.display()
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KitabError::Internal("Query stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KitabError::Internal("Query stderr not captured".to_string()))?;

        tokio::spawn(async move {
            let out_task = tokio::spawn(forward_stdout(stdout, updates.clone()));
            let err_task = tokio::spawn(forward_stderr(stderr, updates.clone()));
            let _ = out_task.await;
            let _ = err_task.await;

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to wait for query process");
                    None
                }
            };
            tracing::debug!(?code, "Query process exited");
            let _ = updates.send(QueryUpdate::Exited(code));
        });

        Ok(())
    }
}

async fn forward_stdout<R: AsyncRead + Unpin>(mut reader: R, updates: UnboundedSender<QueryUpdate>) {
    let mut buf = [0u8; 4096];
    let mut pending = Vec::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut pending);
                if !text.is_empty() && updates.send(QueryUpdate::Stdout(text)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read query stdout");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let _ = updates.send(QueryUpdate::Stdout(
            String::from_utf8_lossy(&pending).into_owned(),
        ));
    }
}

async fn forward_stderr<R: AsyncRead + Unpin>(reader: R, updates: UnboundedSender<QueryUpdate>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if updates.send(QueryUpdate::Stderr(line)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read query stderr");
                break;
            }
        }
    }
}

/// Drain the longest valid UTF-8 prefix of `pending`.
///
/// An incomplete trailing sequence stays buffered; invalid bytes are replaced.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let keep = match std::str::from_utf8(pending.as_slice()) {
        Err(e) if e.error_len().is_none() => pending.len() - e.valid_up_to(),
        _ => 0,
    };
    let rest = pending.split_off(pending.len() - keep);
    let text = String::from_utf8_lossy(pending.as_slice()).into_owned();
    *pending = rest;
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn args_include_history_and_question() {
        let command = QueryCommand::external("python3 query.py").unwrap();
        let history = vec![HistoryTurn {
            question: "q1".to_string(),
            answer: "a1".to_string(),
        }];

        let args = command.args_for("What is patience?", &history).unwrap();
        assert_eq!(command.program(), &PathBuf::from("python3"));
        assert_eq!(
            args,
            vec![
                "query.py",
                "--stream",
                "--history",
                r#"[{"question":"q1","answer":"a1"}]"#,
                "--",
                "What is patience?",
            ]
        );
    }

    #[test]
    fn empty_history_is_omitted() {
        let command = QueryCommand::external("kitab query").unwrap();
        let args = command.args_for("hi", &[]).unwrap();
        assert_eq!(args, vec!["query", "--stream", "--", "hi"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            QueryCommand::external("   "),
            Err(KitabError::Validation(_))
        ));
    }

    #[test]
    fn take_utf8_holds_back_partial_sequence() {
        let bytes = "aṣb".as_bytes();
        let mut pending = bytes[..2].to_vec();

        assert_eq!(take_utf8(&mut pending), "a");
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "ṣb");
        assert!(pending.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_forwards_output_then_exit() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // trailing arguments become positional parameters of the script
        let command = QueryCommand {
            program: PathBuf::from("sh"),
            base_args: vec![
                "-c".to_string(),
                "printf 'Hello'; echo Thinking... >&2; exit 3".to_string(),
            ],
        };
        command.spawn("ignored", &[], tx).unwrap();

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            let done = matches!(update, QueryUpdate::Exited(_));
            updates.push(update);
            if done {
                break;
            }
        }

        assert!(updates.contains(&QueryUpdate::Stdout("Hello".to_string())));
        assert!(updates.contains(&QueryUpdate::Stderr("Thinking...".to_string())));
        assert_eq!(updates.last(), Some(&QueryUpdate::Exited(Some(3))));
    }
}
