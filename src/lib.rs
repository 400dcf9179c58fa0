//! # nodebridge
//!
//! Bridges a network of small embedded controllers ("nodes"), which talk a
//! broadcast message protocol over TCP links, to richer clients: a REST/SSE
//! HTTP front-end and a bus-style interface driven from the console.
//!
//! ## Key Modules
//! * `wire` – Message set, codec and TCP links.
//! * `hub` – Link table, node id substitution, routing and forwarding.
//! * `descriptions` – What each node is: variables, local events, definitions.
//! * `variables` – Correlates variable reads with their replies; value cache.
//! * `subscriptions` – Event filters and fan-out to subscribers.
//! * `script` – Script bundles and the pluggable compiler.
//! * `http` – axum front-end with ordered responses and SSE streams.
//! * `bus` – Bus-style front-end and event filter objects.
//! * `events` – Structured logging/events dispatcher.
//! * `prompt` – Interactive console.

pub mod bus;
pub mod config;
pub mod constants;
pub mod descriptions;
pub mod error;
pub mod events;
pub mod http;
pub mod hub;
pub mod prelude; // curated re-exports
pub mod prompt;
pub mod script;
pub mod subscriptions;
pub mod variables;
pub mod wire;
