//! Tail a push stream and print every notification as a JSON line.
//!
//! Usage: `push-tail [URI] [TOKEN] [--max-events N]`
//!
//! URI and TOKEN fall back to `PUSH_STREAM_URI` and `PUSH_STREAM_TOKEN`.
//! Diagnostics go to stderr, filtered by `RUST_LOG`.

use futures::StreamExt;
use push_stream::{EventKind, Notification, Session};
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// Line written to stdout for each notification
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Line {
    #[serde(rename = "type")]
    line_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

struct Args {
    uri: String,
    token: String,
    max_events: Option<usize>,
}

fn parse_args() -> Result<Args, String> {
    let mut positional = Vec::new();
    let mut max_events = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--max-events" {
            let value = args.next().ok_or("--max-events needs a value")?;
            let count = value
                .parse::<usize>()
                .map_err(|e| format!("invalid --max-events `{}`: {}", value, e))?;
            max_events = Some(count);
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let uri = positional
        .next()
        .or_else(|| env::var("PUSH_STREAM_URI").ok())
        .ok_or("missing stream URI (argument or PUSH_STREAM_URI)")?;
    let token = positional
        .next()
        .or_else(|| env::var("PUSH_STREAM_TOKEN").ok())
        .ok_or("missing token (argument or PUSH_STREAM_TOKEN)")?;

    Ok(Args {
        uri,
        token,
        max_events,
    })
}

fn print_line(line: &Line) {
    let mut stdout = io::stdout().lock();
    if let Ok(json) = serde_json::to_string(line) {
        // Closed stdout (e.g. piped into `head`) is not worth a failure
        let _ = writeln!(stdout, "{}", json);
        let _ = stdout.flush();
    }
}

fn lifecycle_line(notification: &Notification) -> Line {
    let payload = match notification {
        Notification::Response(response) => serde_json::to_value(response).ok(),
        Notification::ReconnectError(failure) => serde_json::to_value(failure).ok(),
        Notification::Error(err) => Some(Value::String(err.to_string())),
        Notification::Event(_) | Notification::Disconnect | Notification::Reconnect => None,
    };

    Line {
        line_type: notification.kind().as_str(),
        payload,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("push-tail: {}", message);
            return ExitCode::from(2);
        }
    };

    let session = match Session::new(args.uri, args.token) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("push-tail: {}", err);
            return ExitCode::from(2);
        }
    };

    for kind in EventKind::ALL {
        if kind != EventKind::Event {
            session.on(kind, |notification| {
                print_line(&lifecycle_line(notification));
                Ok(())
            });
        }
    }
    let mut events = session.events();

    if let Err(err) = session.connect().await {
        eprintln!("push-tail: {}", err);
        return ExitCode::FAILURE;
    }

    let mut seen = 0;
    while let Some(event) = events.next().await {
        print_line(&Line {
            line_type: EventKind::Event.as_str(),
            payload: Some(event.to_json()),
        });

        seen += 1;
        if args.max_events.is_some_and(|max| seen >= max) {
            break;
        }
    }

    session.abort();
    ExitCode::SUCCESS
}
