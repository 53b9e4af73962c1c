use std::io::{self, Write};
use std::time::Duration;

use hearth_core::{HearthCfg, Orchestrator, ReplyKind, TurnRequest};
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SPINNER: [&str; 4] = ["-", "\\", "|", "/"];

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

/// Read utterances until `/quit`, EOF, Ctrl+C or cancellation.
///
/// `/speaker <id>` switches the speaker used for following turns.
pub async fn run(
    orchestrator: &Orchestrator,
    cfg: &HearthCfg,
    token: CancellationToken,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    let mut speaker = cfg.default_speaker.clone();
    println!("speaking as '{speaker}'. /speaker <id> to switch, /quit to exit.");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = line_rx.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let line = match event {
            InputEvent::Line(line) => line,
            InputEvent::Interrupted => {
                token.cancel();
                break;
            }
            InputEvent::Eof => break,
            InputEvent::Error(err) => {
                eprintln!("input error: {err}");
                break;
            }
        };

        let text = line.trim();
        if text.is_empty() {
            request_next_prompt(&ready_tx);
            continue;
        }
        if matches!(text, "/q" | "/exit" | "/quit") {
            break;
        }
        if let Some(id) = text.strip_prefix("/speaker") {
            let id = id.trim();
            if !id.is_empty() {
                speaker = id.to_string();
            }
            println!("speaking as '{speaker}'");
            request_next_prompt(&ready_tx);
            continue;
        }

        let request = TurnRequest::new(text).with_speaker(speaker.clone());
        let turn = orchestrator.process(request);
        tokio::pin!(turn);

        let mut spinner_idx = 0usize;
        let mut spinner = tokio::time::interval(Duration::from_millis(100));
        spinner.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let reply = loop {
            tokio::select! {
                _ = token.cancelled() => break None,
                _ = spinner.tick() => {
                    spinner_idx = (spinner_idx + 1) % SPINNER.len();
                    draw_thinking_frame(SPINNER[spinner_idx])?;
                }
                reply = &mut turn => break Some(reply),
            }
        };
        clear_current_line()?;
        let Some(reply) = reply else {
            break;
        };

        match reply.kind {
            ReplyKind::HandOff => println!("[hand-off] {}", reply.speech),
            ReplyKind::Cache => println!("Hearth (cached)> {}", reply.speech),
            ReplyKind::Model | ReplyKind::Neutral => println!("Hearth> {}", reply.speech),
        }
        if let Some(err) = reply.error {
            tracing::debug!(code = ?err.code, message = %err.message, "turn ended with error");
        }
        request_next_prompt(&ready_tx);
    }
    drop(ready_tx);
    println!();
    Ok(())
}

fn draw_thinking_frame(frame: &str) -> anyhow::Result<()> {
    print!("\rthinking... {frame}");
    io::stdout().flush()?;
    Ok(())
}

fn clear_current_line() -> anyhow::Result<()> {
    print!("\r\x1b[2K");
    io::stdout().flush()?;
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

/// rustyline blocks, so it lives on its own thread and reads one line per
/// ready signal.
fn spawn_input_thread(
    line_tx: mpsc::UnboundedSender<InputEvent>,
    ready_rx: std::sync::mpsc::Receiver<()>,
) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline("You> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}
