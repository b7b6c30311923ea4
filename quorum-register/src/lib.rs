//! Linearizable single-register store replicated with majority quorums.
//!
//! A fixed [`view::View`] of replica processes each hold one
//! [`register::Register`]. Clients read and write through a
//! [`client::QuorumClient`], which talks to every replica concurrently and
//! completes once a majority has answered. Reads that find replicas
//! disagreeing write the newest value back to a majority before returning,
//! so every read observes the latest completed write.
//!
//! - [`view`] describes membership and quorum arithmetic.
//! - [`register`] is the replica-side timestamped slot.
//! - [`service`] is the replica's RPC surface over its register and view.
//! - [`message`] defines the JSON line protocol replicas speak.
//! - [`transport`] abstracts "send one request to one process": TCP for real
//!   deployments, in-memory with fault injection for tests.
//! - [`client`] implements the quorum read/write protocol.
//! - [`server`] runs a replica behind a TCP listener.
//! - [`config`], [`cli`] and [`bench`] support the `quorum-register` binary.

pub mod bench;
pub mod cli;
pub mod client;
pub mod config;
pub mod message;
pub mod register;
pub mod server;
pub mod service;
pub mod transport;
pub mod view;
