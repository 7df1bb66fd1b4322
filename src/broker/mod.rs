//! Producer/Consumer Broker Module
//!
//! A `Broker<T>` decouples the arrival of records from their consumption across
//! an RPC boundary. The receiving party's ingest path produces into it, and a
//! consumer drains it into storage or into a streamed response.
//!
//! ## Core Concepts
//! - **Bounded FIFO**: items come out in production order; a full broker applies
//!   backpressure to the producer for a bounded time.
//! - **Finished**: the producer promises no more items. Never cleared.
//! - **Closable**: `finished && empty`, or an error was recorded. Monotonic.
//! - **Signal wait**: the consumer blocks on new data with a timeout instead of
//!   spinning.

pub mod broker;

pub use broker::Broker;
