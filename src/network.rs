//! Shard connection layer
//!
//! Transports, the per-shard connection manager and a JSON-RPC ledger built
//! on top of it.

pub mod connection;
pub mod rpc;
pub mod transport;

pub use connection::{ChannelState, ShardChannel, ShardConnectionManager};
pub use rpc::{parse_running_chains, JsonRpcRequest, JsonRpcResponse, ShardRpcLedger};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
