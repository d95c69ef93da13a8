//! Exchange-agnostic connectivity core: session state machines, token
//! lifecycle, order-book assembly, and execution reconciliation for
//! multi-venue crypto trading.
//!
//! Module layout follows the component list in §2 of the design: each
//! `pub mod` below is one bottom-up layer, from [`transport`] (raw framed
//! I/O) up through [`facade`] (the one surface a strategy talks to).

pub mod config;
pub mod credential;
pub mod domain;
pub mod error;
pub mod facade;
pub mod multiplexer;
pub mod orderbook_assembler;
pub mod reconciler;
pub mod session_machine;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod venue_protocol;

pub use error::CoreError;
