//! Retrieval-augmented chat over a pre-indexed book corpus.
//!
//! The server side ([`api`], [`chat`]) answers questions by letting a chat
//! model call a book search tool ([`search`]) and streams the result as
//! [`models::StreamEvent`]s. Two clients consume that: the terminal client
//! ([`tui`]), which drives the one-shot [`query`] mode as a subprocess, and
//! the embedded web page, whose state machine is mirrored in [`client`].

pub mod api;
pub mod chat;
pub mod client;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod models;
pub mod query;
pub mod search;
pub mod tui;
