//! LSP (Language Server Protocol) implementation layer
//!
//! This module handles communication with editors via LSP and reports the
//! state of declared npm dependencies.
//!
//! # Modules
//!
//! - [`backend`]: Main LSP backend implementing `LanguageServer` trait
//! - [`code_action`]: Range update and install actions
//! - [`completion`]: Version completion inside dependency values
//! - [`diagnostics`]: Generates diagnostics from resolution results
//! - [`document_link`]: Links dependency names to their npm page
//! - [`install`]: Workspace commands (install, cache cleaning)
//! - [`server`]: LSP server initialization and lifecycle

pub mod backend;
pub mod code_action;
pub mod completion;
pub mod diagnostics;
pub mod document_link;
pub mod install;
pub mod server;
