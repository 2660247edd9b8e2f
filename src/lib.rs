//! envelope-exchange - tracked export and import jobs for budgeting data
//!
//! This library moves transactions, budgets, goals and categories in and out
//! of a budgeting store as CSV, JSON, Excel or PDF. Every transfer runs as an
//! asynchronous, cancellable operation with progress, history and a
//! downloadable artifact.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `models`: Records, operations and artifacts
//! - `codec`: Streaming encoders and decoders per format
//! - `validation`: Field-level checks that turn decoded rows into records
//! - `storage`: Operation registry, artifact store and record access
//! - `services`: Dispatcher, cancellation, retention and the exchange facade
//! - `audit`: Audit logging system
//! - `cli` / `display`: Command handlers and terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use envelope_exchange::config::{ExchangePaths, Settings};
//! use envelope_exchange::services::{ExchangeService, ExportRequest};
//!
//! let paths = ExchangePaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let service = ExchangeService::open(&paths, &settings)?;
//! let id = service.submit_export(&user, ExportRequest::new(DataType::All, ExchangeFormat::Csv))?;
//! ```

pub mod audit;
pub mod cli;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;
pub mod validation;

pub use error::{ExchangeError, ExchangeResult};
