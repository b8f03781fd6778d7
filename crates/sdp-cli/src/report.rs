//! Playbook-aware error reporting.
//!
//! Every user-visible failure prints the stable error code, the playbook
//! title as the one-line human message, and the fast-path steps. Verbose
//! mode appends the deep path and related docs. There is no silent
//! failure path through here.

use sdp_error::SdpError;
use sdp_playbook::{Playbook, PlaybookStep};

/// Render an error with its recovery playbook.
pub fn render_error(err: &SdpError, verbose: bool) -> String {
    let mut out = String::new();
    match sdp_playbook::global().lookup(err.code) {
        Some(playbook) => {
            out.push_str(&format!(
                "error[{}]: {} ({})\n",
                err.code.as_str(),
                playbook.title,
                playbook.severity
            ));
            out.push_str(&format!("  {}\n", err.message));
            out.push_str("\nWhat to do:\n");
            render_steps(&mut out, &playbook.fast_path);
            if verbose {
                render_verbose(&mut out, playbook, err);
            }
        }
        None => {
            out.push_str(&format!("error[{}]: {}\n", err.code.as_str(), err.message));
        }
    }
    out
}

fn render_steps(out: &mut String, steps: &[PlaybookStep]) {
    for step in steps {
        out.push_str(&format!("  {}. {}\n", step.order, step.description));
        if let Some(cmd) = &step.command {
            out.push_str(&format!("       $ {cmd}\n"));
        }
        if let Some(expected) = &step.expected {
            out.push_str(&format!("       expect: {expected}\n"));
        }
    }
}

fn render_verbose(out: &mut String, playbook: &Playbook, err: &SdpError) {
    if !playbook.deep_path.is_empty() {
        out.push_str("\nIf that does not resolve it:\n");
        render_steps(out, &playbook.deep_path);
    }
    if !playbook.related_docs.is_empty() {
        out.push_str("\nRelated docs:\n");
        for doc in &playbook.related_docs {
            out.push_str(&format!("  - {doc}\n"));
        }
    }
    if !err.context.is_empty() {
        if let Ok(ctx) = serde_json::to_string_pretty(&err.context) {
            out.push_str(&format!("\nContext:\n{ctx}\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdp_error::ErrorCode;

    #[test]
    fn renders_code_title_and_fast_path() {
        let err = SdpError::new(ErrorCode::SessionCorrupted, "hash mismatch in session.json");
        let text = render_error(&err, false);
        assert!(text.contains("error[SESSION_CORRUPTED]"));
        assert!(text.contains("Session failed tamper detection"));
        assert!(text.contains("sdp session repair"));
        // Deep path only appears in verbose mode.
        assert!(!text.contains("how the file changed"));
    }

    #[test]
    fn verbose_adds_deep_path_and_context() {
        let err = SdpError::new(ErrorCode::HashChainBroken, "line 3 (ws_completed)")
            .with_context("line", 3);
        let text = render_error(&err, true);
        assert!(text.contains("If that does not resolve it:"));
        assert!(text.contains("Related docs:"));
        assert!(text.contains("Context:"));
        assert!(text.contains("\"line\": 3"));
    }

    #[test]
    fn every_code_renders_without_panicking() {
        for code in ErrorCode::ALL {
            let err = SdpError::new(*code, "x");
            let text = render_error(&err, true);
            assert!(text.contains(code.as_str()));
        }
    }
}
