//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic so route handlers can stay focused on
//! protocol translation: `chat` + `session` (+ `sweeper`) back the AI chat
//! proxy, `relay` backs the task websocket.

pub mod chat;
pub mod relay;
pub mod session;
pub mod sweeper;
