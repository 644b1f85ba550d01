// ABOUTME: Transport crate for the Parley platform
// ABOUTME: REST agent API plus the Phoenix-style channel socket

pub mod client;
pub mod rest;
pub mod socket;

pub use client::{LinkConfig, PlatformClient, DEFAULT_REST_URL, DEFAULT_WS_URL};
pub use rest::RestClient;
pub use socket::{Frame, SocketHandle};
