//! # Voice Stream Client
//!
//! Client for a WebSocket speech translation service: streams an audio file
//! to the service, collects the recognised and translated sentences, and plays
//! the synthesised speech it sends back as it arrives.
//!
//! ## Module Layout:
//! - **audio**: the streaming playback engine and PCM file handling
//! - **client**: one translation session over a WebSocket
//! - **config**: layered configuration (defaults, TOML file, environment)
//! - **error**: error types for the engine and the application
//! - **protocol**: JSON frames exchanged with the service
//! - **signature**: request signing
//! - **state**: transcript and traffic counters shared between session tasks

pub mod audio;      // Playback engine (audio/ directory)
pub mod client;     // WebSocket session (client.rs)
pub mod config;     // Configuration management (config.rs)
pub mod error;      // Error handling types (error.rs)
pub mod protocol;   // Wire frames (protocol.rs)
pub mod signature;  // Request signing (signature.rs)
pub mod state;      // Session state (state.rs)
