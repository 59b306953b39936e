mod backup;
mod calc;
mod db;
mod ipc;
mod legacy;
mod logging;
mod report;
mod setup;

use std::io::{self, BufRead, Write};
use tracing::{debug, info, warn};

fn main() {
    if let Err(e) = logging::init_tracing() {
        eprintln!("raportd: logging disabled: {e}");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "raportd starting");

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed with error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to; reply with a bare error line.
                warn!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    debug!("stdin closed, exiting");
}
