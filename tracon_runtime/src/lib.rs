//! Shared runtime pieces for the TRACON server and its clients.
//!
//! Re-exports the data contracts from `tracon_schema` and adds what both ends
//! of the RPC channel need without pulling in the server: the error taxonomy,
//! the request/response envelopes with their protobuf framing, and the
//! clearance shorthand interpreter.

pub use tracon_schema::*;

pub mod command_text;
pub mod commands;
pub mod error;

pub use command_text::{
    parse_clearance, run_aircraft_commands, tokenize, ClearanceSink, ParsedCommand,
};
pub use commands::{
    EnvelopeDecodeError, EnvelopeEncodeError, RequestEnvelope, ResponseEnvelope, RpcRequest,
    RpcResponse,
};
pub use error::SimError;
