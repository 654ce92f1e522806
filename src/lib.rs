//! # Harvest
//!
//! A fetch orchestration engine: declare groups of HTTP requests with
//! lifecycle hooks, then run them as one batch with progress reporting.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → ExecutionPlan → (sync loop | Batch) → Module hooks → Request hooks
//! ```
//!
//! A [`Fetcher`](engine::Fetcher) owns a fetchable value and a list of module
//! definitions. Each run instantiates the modules, drops those whose
//! `fetch_if` says no, sends synchronous modules' requests one at a time and
//! then every concurrent module's requests through a shared worker pool.
//! Progress is reported as whole percentages from 0 to 100.
//!
//! ## Quick Start
//!
//! ```bash
//! # Write ~/.config/harvest/config.toml
//! harvest init-config
//!
//! # Show what a manifest would fetch
//! harvest plan sources/rust-blog.toml
//!
//! # Fetch it, storing bodies on disk
//! harvest run sources/rust-blog.toml --out dump
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: Configuration file handling
//! - [`domain`]: Requests, responses and failures
//! - [`engine`]: Fetcher, modules, callbacks and progress
//! - [`manifest`]: TOML source manifests
//! - [`transport`]: HTTP transport and the concurrent batch

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together configuration
/// and the HTTP transport.
pub mod app;

/// Command-line interface using clap.
///
/// - `run <manifest>` - Fetch a manifest's requests
/// - `plan <manifest>` - Print the execution plan
/// - `init-config` - Write the default config file
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/harvest/config.toml`.
pub mod config;

/// Core request and response types.
///
/// - [`Request`](domain::Request): Builder for one outbound call and its hooks
/// - [`Response`](domain::Response): A completed HTTP exchange
/// - [`Failure`](domain::Failure): Non-2xx status or transport failure
pub mod domain;

/// Fetch orchestration.
///
/// - [`Fetcher`](engine::Fetcher): Plans and runs modules over a fetchable
/// - [`ModuleClass`](engine::ModuleClass): Declarative module definition
/// - [`CallbackRegistry`](engine::CallbackRegistry): Ordered named hook lists
/// - [`Progress`](engine::Progress): Percentage tracking
pub mod engine;

/// TOML manifests describing a source and its modules.
pub mod manifest;

/// Request execution.
///
/// - [`Transport`](transport::Transport): Async trait performing one request
/// - [`HttpTransport`](transport::HttpTransport): reqwest-based implementation
/// - [`Batch`](transport::Batch): Bounded concurrent execution
pub mod transport;
