//! ptysh console.
//!
//! Thin line-oriented front end for the session manager: starts one
//! shell session, prints its output, and forwards typed lines.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};

use ptysh::config::Config;
use ptysh::session::{OutputSink, ShellSession, NOTICE_PREFIX};

/// Interactive PTY shell console.
#[derive(Parser, Debug)]
#[command(name = "ptysh")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut session = ShellSession::with_dimensions(config.terminal.cols, config.terminal.rows);

    // Content chunks go to stdout verbatim; lifecycle notices get their
    // own line on stderr.
    let sink: OutputSink = Arc::new(|output: String| {
        if let Some(notice) = output.strip_prefix(NOTICE_PREFIX) {
            eprintln!("[i] {}", notice.trim_end());
        } else {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(output.as_bytes());
            let _ = stdout.flush();
        }
    });

    session.start(sink).await?;

    println!("[i] empty line, 'exit' or 'quit' ends the session");
    println!("[i] 'resize <cols> <rows>' changes the terminal dimensions");

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if !session.is_running() {
            break;
        }

        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = interrupt.recv() => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "exit" || trimmed == "quit" {
            break;
        }

        if let Some(args) = trimmed.strip_prefix("resize ") {
            match parse_resize(args) {
                Some((cols, rows)) => match session.notify_resize(cols, rows) {
                    Ok(()) => println!("[i] resized to {cols}x{rows}"),
                    Err(err) => eprintln!("[!] resize failed: {err}"),
                },
                None => eprintln!("[!] usage: resize <cols> <rows>"),
            }
            continue;
        }

        if session.write(&line).await.is_err() {
            break;
        }
    }

    session.stop().await;
    Ok(())
}

/// Parses `"<cols> <rows>"` into a dimension pair.
fn parse_resize(args: &str) -> Option<(u16, u16)> {
    let mut parts = args.split_whitespace();
    let cols = parts.next()?.parse().ok()?;
    let rows = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((cols, rows))
}
