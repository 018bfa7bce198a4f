//! HTTP and WebSocket request handlers.

pub mod realtime;
