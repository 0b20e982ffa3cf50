use std::{future::Future, io::Write, time::Duration};

use anyhow::{bail, Context, Result};
use chatloop_agent_core::{ChatSession, CooperativeCancellationToken, TurnError, GREETING};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::render::TranscriptRenderer;

const HELP_TEXT: &str = "\
commands:
  /approve <id>  approve a pending MCP tool call
  /deny <id>     deny a pending MCP tool call
  /tools         print the tools configuration sent upstream
  /reset         start a new conversation
  /help          show this help
  /quit          exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Help,
    Reset,
    Tools,
    Approve(String),
    Deny(String),
    Exit,
    Invalid(String),
}

/// Parses a `/command` line; plain text yields `None`.
pub(crate) fn parse_repl_command(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::to_string);
    let command = match (name, argument) {
        ("help", _) => ReplCommand::Help,
        ("reset", _) => ReplCommand::Reset,
        ("tools", _) => ReplCommand::Tools,
        ("quit" | "exit", _) => ReplCommand::Exit,
        ("approve", Some(id)) => ReplCommand::Approve(id),
        ("deny", Some(id)) => ReplCommand::Deny(id),
        ("approve" | "deny", None) => {
            ReplCommand::Invalid(format!("usage: /{name} <approval request id>"))
        }
        _ => ReplCommand::Invalid(format!("unknown command '{line}' (try /help)")),
    };
    Some(command)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptRunStatus {
    Completed,
    Cancelled,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TurnInput<'a> {
    Message(&'a str),
    Approval { id: &'a str, approve: bool },
}

/// Runs one turn, cancelling it cooperatively on `cancellation_signal` or timeout.
pub(crate) async fn run_turn_with_cancellation<F>(
    session: &ChatSession,
    input: TurnInput<'_>,
    turn_timeout_ms: u64,
    cancellation_signal: F,
) -> PromptRunStatus
where
    F: Future,
{
    let token = CooperativeCancellationToken::new();
    session.set_cancellation_token(Some(token.clone()));

    let turn = async {
        match input {
            TurnInput::Message(text) => session.send_user_message(text).await,
            TurnInput::Approval { id, approve } => session.respond_to_approval(id, approve).await,
        }
    };
    let timeout = async {
        if turn_timeout_ms == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_millis(turn_timeout_ms)).await;
        }
    };
    tokio::pin!(turn);
    tokio::pin!(timeout);
    tokio::pin!(cancellation_signal);

    let mut interrupted = None;
    let result = tokio::select! {
        result = &mut turn => result,
        _ = &mut cancellation_signal => {
            token.cancel();
            interrupted = Some(PromptRunStatus::Cancelled);
            (&mut turn).await
        }
        _ = &mut timeout => {
            token.cancel();
            interrupted = Some(PromptRunStatus::TimedOut);
            (&mut turn).await
        }
    };
    session.set_cancellation_token(None);

    match result {
        Ok(summary) => {
            tracing::debug!(rounds = summary.rounds, "turn completed");
            PromptRunStatus::Completed
        }
        Err(TurnError::Cancelled) => interrupted.unwrap_or(PromptRunStatus::Cancelled),
        Err(TurnError::UnknownApprovalRequest(id)) => {
            eprintln!("no pending approval request with id '{id}'");
            PromptRunStatus::Failed
        }
        Err(error) => {
            tracing::debug!(error = %error, "turn failed");
            PromptRunStatus::Failed
        }
    }
}

fn report_prompt_status(status: PromptRunStatus) {
    if status == PromptRunStatus::Cancelled {
        println!("\nrequest cancelled\n");
    } else if status == PromptRunStatus::TimedOut {
        println!("\nrequest timed out\n");
    }
}

pub(crate) async fn run_prompt_once(
    session: &ChatSession,
    prompt: &str,
    turn_timeout_ms: u64,
) -> Result<()> {
    let status = run_turn_with_cancellation(
        session,
        TurnInput::Message(prompt),
        turn_timeout_ms,
        tokio::signal::ctrl_c(),
    )
    .await;
    report_prompt_status(status);
    if status != PromptRunStatus::Completed {
        bail!("turn did not complete");
    }
    Ok(())
}

pub(crate) async fn run_interactive(
    session: &ChatSession,
    renderer: &TranscriptRenderer,
    turn_timeout_ms: u64,
) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("assistant> {GREETING}");

    loop {
        print!("you> ");
        std::io::stdout()
            .flush()
            .context("failed to flush stdout")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let input = match parse_repl_command(trimmed) {
            None => TurnInput::Message(trimmed),
            Some(ReplCommand::Exit) => break,
            Some(ReplCommand::Help) => {
                println!("{HELP_TEXT}");
                continue;
            }
            Some(ReplCommand::Reset) => {
                session.reset().await;
                renderer.reset();
                println!("assistant> {GREETING}");
                continue;
            }
            Some(ReplCommand::Tools) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(session.tools_configuration())
                        .context("failed to render tools configuration")?
                );
                continue;
            }
            Some(ReplCommand::Invalid(message)) => {
                println!("{message}");
                continue;
            }
            Some(ReplCommand::Approve(id)) => {
                let status = run_approval(session, &id, true, turn_timeout_ms).await;
                report_prompt_status(status);
                continue;
            }
            Some(ReplCommand::Deny(id)) => {
                let status = run_approval(session, &id, false, turn_timeout_ms).await;
                report_prompt_status(status);
                continue;
            }
        };

        let status =
            run_turn_with_cancellation(session, input, turn_timeout_ms, tokio::signal::ctrl_c())
                .await;
        report_prompt_status(status);
    }

    Ok(())
}

async fn run_approval(
    session: &ChatSession,
    id: &str,
    approve: bool,
    turn_timeout_ms: u64,
) -> PromptRunStatus {
    run_turn_with_cancellation(
        session,
        TurnInput::Approval { id, approve },
        turn_timeout_ms,
        tokio::signal::ctrl_c(),
    )
    .await
}
