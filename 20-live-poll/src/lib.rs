//! Live polling server.
//!
//! Clients hold a WebSocket open, cast one vote each on a seven-point ballot
//! and hear about every open/close of the poll as it happens. An admin opens
//! and closes voting and reads the tally over plain HTTP. Each module focuses
//! on a concrete responsibility:
//!
//! - [`ballot`] defines the fixed set of options and their wire spelling.
//! - [`tally`] counts votes, enforces single-use vote keys and announces
//!   open/close transitions.
//! - [`message`] is the JSON envelope exchanged over the socket.
//! - [`hub`] is the single task that owns all connections, routes inbound
//!   messages and fans out status changes.
//! - [`connection`] runs the receive and send paths for one socket,
//!   including keepalive pings and the read deadline.
//! - [`auth`] gates the admin endpoints.
//! - [`server`] wires everything into an axum router.
//! - [`cli`] parses the command-line interface.
//!
//! Integration tests use this crate directly to exercise the hub and the
//! full HTTP/WebSocket flow.

pub mod auth;
pub mod ballot;
pub mod cli;
pub mod connection;
pub mod hub;
pub mod message;
pub mod server;
pub mod tally;
