//! # rconsole - Serial Console Provisioning for Network Devices
//!
//! `rconsole` is a Rust library for provisioning routers and switches over a
//! serial console. It watches the console for prompts, walks the device from
//! whatever state it booted into (setup dialog, autoinstall, login, user exec,
//! privileged exec) to global configuration mode, and then streams a
//! configuration file to it line by line.
//!
//! ## Features
//!
//! - **Prompt Detection**: Ordered prompt rules compiled into a single `RegexSet`
//! - **State Machine Management**: Bounded retries and probes with timeout-bounded waits
//! - **Background Line Reader**: Newline-framed reading that never blocks the writer
//! - **Config Push**: Comment-aware, paced line writer with an audit digest
//! - **Session Recording**: JSONL event trails that can be replayed offline
//! - **Async/Await**: Built on Tokio; any `AsyncRead + AsyncWrite` stream works
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rconsole::config::ProvisionConfig;
//! use rconsole::session::{ConfigScript, ScriptedOperator, provision};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = tokio_serial::SerialStream::open(&tokio_serial::new("/dev/ttyUSB0", 9600))?;
//!     let script = ConfigScript::from_file("router.cfg")?;
//!     let mut operator = ScriptedOperator::accept_all().with_password("cisco");
//!
//!     let report = provision(port, &script, &ProvisionConfig::default(), &mut operator, None).await?;
//!     println!("{:?}: {} lines sent", report.outcome, report.push.map_or(0, |p| p.sent));
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::ConsoleSession`] - Owns the console stream and its line reader
//! - [`session::DeviceStateMachine`] - Drives the device to global config mode
//! - [`device::PromptClassifier`] - Maps console lines to device states
//! - [`error::ConsoleError`] - Error types for console and state operations
//! - [`config`] - Timing defaults and provisioning settings

pub mod config;
pub mod device;
pub mod error;
pub mod session;
