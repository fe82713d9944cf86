//! chat-reconcile library.
//!
//! Keeps a per-room chat timeline consistent while messages arrive from
//! three places at once: the history fetch, the live transport and the
//! user's own optimistic sends.
//!
//! Architecture:
//! - Caller thread owns `ClientState` and applies backend events with
//!   `events::process_events`
//! - Backend thread runs a Tokio runtime for history, send and live I/O
//! - Communication via crossbeam channels (`EngineAction` / `UiEvent`)

pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod input_state;
pub mod logging;
pub mod merge;
pub mod message;
pub mod protocol;
pub mod state;
pub mod validation;
