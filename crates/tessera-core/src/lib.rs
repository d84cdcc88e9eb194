//! # tessera-core
//!
//! Core types shared by every tessera crate: the error enum, settings and
//! their loader, and `tracing` setup. This crate has no database code.
//!
//! ## Modules
//!
//! - [`error`] - [`TesseraError`] and the [`TesseraResult`] alias
//! - [`settings`] - [`Settings`] and [`DatabaseSettings`]
//! - [`settings_loader`] - TOML/JSON loading with environment overrides
//! - [`logging`] - Tracing subscriber setup and spans

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

pub use error::{TesseraError, TesseraResult};
pub use settings::{DatabaseSettings, LogFormat, Settings};
