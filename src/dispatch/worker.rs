//! Worker side of the pool protocol
//!
//! Runs inside each worker subprocess: reads one request per line, answers
//! one response per line. Stdout carries nothing but protocol lines.

use super::protocol::{WorkerRequest, WorkerResponse, WorkerSettings, decode_line, encode_line};
use crate::analyzer::analyzer_for;
use crate::error::DispatchError;
use std::io::{BufRead, Write};
use std::time::Duration;

/// Serve requests from `input` until it closes
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<(), DispatchError> {
    let mut settings = WorkerSettings::default();
    let mut analyzer = analyzer_for(&settings.language)
        .map_err(|e| DispatchError::Protocol(e.to_string()))?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = match decode_line(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };

        let response = match request {
            WorkerRequest::Configure { params } => {
                analyzer = analyzer_for(&params.language)
                    .map_err(|e| DispatchError::Protocol(e.to_string()))?;
                settings = params;
                WorkerResponse::Configured
            }
            WorkerRequest::Analyze {
                content_id,
                source_text,
            } => {
                match injected_fault(&settings, &source_text) {
                    Some(Fault::Hang) => hang(),
                    Some(Fault::Exit) => {
                        tracing::warn!("Exiting on job {}", content_id);
                        std::process::exit(FAULT_EXIT_CODE);
                    }
                    None => {}
                }
                let result = analyzer.analyze(&source_text).map_err(|e| e.to_string());
                WorkerResponse::from_outcome(&content_id, result)
            }
        };

        output.write_all(encode_line(&response)?.as_bytes())?;
        output.flush()?;
    }

    Ok(())
}

/// Serve requests on stdin/stdout
pub fn run() -> Result<(), DispatchError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(stdin.lock(), stdout.lock())
}

const FAULT_EXIT_CODE: i32 = 70;

/// Failure injected by the test hooks in [`WorkerSettings`]
#[derive(Debug, PartialEq, Eq)]
enum Fault {
    Hang,
    Exit,
}

fn injected_fault(settings: &WorkerSettings, source_text: &str) -> Option<Fault> {
    let marked = |marker: &Option<String>| {
        marker
            .as_deref()
            .is_some_and(|m| !m.is_empty() && source_text.contains(m))
    };
    if marked(&settings.exit_marker) {
        Some(Fault::Exit)
    } else if marked(&settings.hang_marker) {
        Some(Fault::Hang)
    } else {
        None
    }
}

fn hang() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_lines(lines: &[&str]) -> Result<Vec<WorkerResponse>, DispatchError> {
        let input = Cursor::new(lines.join("\n"));
        let mut output = Vec::new();
        serve(input, &mut output)?;
        Ok(String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| decode_line(l).unwrap())
            .collect())
    }

    #[test]
    fn test_handshake_and_analysis() {
        let responses = run_lines(&[
            r#"{"kind":"configure","params":{"language":"javascript"}}"#,
            r#"{"kind":"analyze","contentId":"good","sourceText":"var a = 1;"}"#,
            r#"{"kind":"analyze","contentId":"bad","sourceText":"var = ;"}"#,
        ])
        .unwrap();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], WorkerResponse::Configured);

        let good = responses[1].clone().into_outcome().unwrap();
        assert_eq!(good.content_id, "good");
        assert_eq!(good.metrics().map(|m| m.loc), Some(1));

        let bad = responses[2].clone().into_outcome().unwrap();
        assert_eq!(bad.content_id, "bad");
        assert!(bad.reason().unwrap().starts_with("Line 1"));
    }

    #[test]
    fn test_analysis_without_handshake_uses_defaults() {
        let responses =
            run_lines(&[r#"{"kind":"analyze","contentId":"x","sourceText":"f();"}"#]).unwrap();
        assert!(responses[0].clone().into_outcome().unwrap().is_success());
    }

    #[test]
    fn test_malformed_and_blank_lines_skipped() {
        let responses = run_lines(&[
            "",
            "not json",
            r#"{"kind":"analyze","contentId":"x","sourceText":"f();"}"#,
        ])
        .unwrap();
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn test_injected_faults() {
        let settings = WorkerSettings {
            hang_marker: Some("__hang__".into()),
            exit_marker: Some("__exit__".into()),
            ..Default::default()
        };
        assert_eq!(injected_fault(&settings, "var a; // __hang__"), Some(Fault::Hang));
        assert_eq!(injected_fault(&settings, "var a; // __exit__"), Some(Fault::Exit));
        assert_eq!(injected_fault(&settings, "var a;"), None);
        assert_eq!(injected_fault(&WorkerSettings::default(), "__exit__ __hang__"), None);

        let empty = WorkerSettings {
            exit_marker: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(injected_fault(&empty, "anything"), None);
    }

    #[test]
    fn test_unsupported_language_ends_worker() {
        let result = run_lines(&[r#"{"kind":"configure","params":{"language":"cobol"}}"#]);
        assert!(matches!(result, Err(DispatchError::Protocol(_))));
    }
}
