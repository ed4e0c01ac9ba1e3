//! Solver connection to the world model.
//!
//! A [`SolverConnection`] announces the attribute types it produces,
//! pushes attribute updates, and manages URI lifecycles. The world model
//! forwards clients' on-demand requests as URI regular expressions; a
//! background tracker task maintains them, and
//! [`send_data`](SolverConnection::send_data) transmits an on-demand
//! update only while at least one pattern matches its target URI.
//!
//! All writes retry until the world model accepts them, so delivery is
//! at-least-once and calls may wait indefinitely for a reconnect.

mod connection;
mod on_demand;

pub use connection::SolverConnection;
