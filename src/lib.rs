//! Push Stream Rust Client
//!
//! A client for long-lived HTTP event streams: the server keeps one response
//! open and pushes `event:`/`data:` records; the client decodes them into JSON
//! events and reconnects automatically whenever the stream drops.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use push_stream::{EventKind, Notification, Session};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new("https://stream.example.com/v1/rooms/abc/chatMessages", "my-token")?;
//!
//!     session.on(EventKind::Event, |notification| {
//!         if let Notification::Event(event) = notification {
//!             println!("{}: {}", event.name, event.data);
//!         }
//!         Ok(())
//!     });
//!     session.on(EventKind::Disconnect, |_| {
//!         eprintln!("stream dropped, reconnecting");
//!         Ok(())
//!     });
//!
//!     session.connect().await?;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     session.abort();
//!     Ok(())
//! }
//! ```

mod client;
mod emitter;
mod error;
mod reconnect;
mod session;
mod sse;
mod transport;
mod types;

pub use client::SessionBuilder;
pub use emitter::ListenerId;
pub use error::{BoxError, ListenerError, SessionError};
pub use reconnect::{ReconnectConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_RECONNECT_DELAY, KEEP_ALIVE_INTERVAL};
pub use session::Session;
pub use sse::{RecordParser, DEFAULT_MAX_LINE_LEN};
pub use types::{Event, EventKind, HttpResponse, Notification, ReconnectFailure, SessionState};
