use std::io::{self, Write};

use tokio::sync::mpsc;

use crate::output::format::format_line;
use crate::session::BufferChange;
use crate::types::OutputConfig;

/// Writes every line that enters the buffer until the session drops its
/// sender. A reloaded history is printed again in full; clearing only affects
/// the in-memory view.
pub async fn render_to<W: Write>(
    mut rx: mpsc::Receiver<BufferChange>,
    output: OutputConfig,
    mut out: W,
) -> io::Result<()> {
    let mut printed_any = false;

    while let Some(change) = rx.recv().await {
        let write_result = match change {
            BufferChange::Replaced(lines) => {
                if printed_any {
                    tracing::info!(lines = lines.len(), "history reloaded");
                }
                lines
                    .iter()
                    .try_for_each(|line| writeln!(out, "{}", format_line(line, &output)))
            }
            BufferChange::Appended(line) => writeln!(out, "{}", format_line(&line, &output)),
            BufferChange::Cleared => {
                tracing::debug!("log view cleared");
                Ok(())
            }
        }
        .and_then(|()| out.flush());

        if let Err(e) = write_result {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e);
        }
        printed_any = true;
    }

    Ok(())
}
