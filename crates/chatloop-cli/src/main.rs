mod bootstrap_helpers;
mod cli_args;
mod render;
mod runtime_loop;

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;

use crate::bootstrap_helpers::{build_session, init_tracing};
pub(crate) use crate::cli_args::Cli;
use crate::render::TranscriptRenderer;
use crate::runtime_loop::{run_interactive, run_prompt_once};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut session = build_session(&cli)?;
    if cli.print_tools_config {
        println!(
            "{}",
            serde_json::to_string_pretty(session.tools_configuration())
                .context("failed to render tools configuration")?
        );
        return Ok(());
    }

    let renderer = Arc::new(TranscriptRenderer::default());
    {
        let renderer = Arc::clone(&renderer);
        session.subscribe(move |event| {
            let text = renderer.render_event(event);
            if !text.is_empty() {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
        });
    }

    match cli.prompt.as_deref() {
        Some(prompt) => run_prompt_once(&session, prompt, cli.turn_timeout_ms).await,
        None => run_interactive(&session, &renderer, cli.turn_timeout_ms).await,
    }
}
