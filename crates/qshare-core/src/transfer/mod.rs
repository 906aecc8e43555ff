//! Transfer client for the peer's HTTP API
//!
//! | Operation | Request |
//! |---|---|
//! | List | `GET /api/list` |
//! | Download | `GET /download/{name}` |
//! | Upload | `POST /upload` (multipart field `file`) |
//! | Ping | `GET /api/ping` |
//!
//! Non-2xx answers fail with [`Error::HttpStatus`](crate::Error::HttpStatus).

pub mod client;
pub mod wire;

pub use client::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, TransferClient, TransferConfig};
pub use wire::{download_path, parse_listing};
