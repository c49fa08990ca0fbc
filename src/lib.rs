//! bump-echo: a marker-framed byte-bump echo server and client
//!
//! Two programs share one protocol definition:
//! - The server echoes every byte framed between `^` and `$` markers
//!   back to the peer, incremented by one (wrapping at 255), with one
//!   pool worker per connection.
//! - The client drives a fixed message script over any number of
//!   concurrent connections; each session pairs a scripted writer with
//!   a reader that stops once the `1111` sentinel shows up in the
//!   accumulated response stream.

pub mod client;
pub mod config;
pub mod pool;
pub mod protocol;
pub mod server;
