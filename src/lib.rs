#![doc = include_str!("../README.md")]

mod common;
mod overlay;
pub mod rpc;
pub mod storage;

pub use common::{
    AlertReason, Id, InvalidBitWidth, LookupResult, Node, NodeInfo, NodeStatus, RequestSpecific,
    ResponseSpecific, RingSpace, RoutingTable, MAX_BITS,
};
pub use overlay::Overlay;
pub use rpc::{
    Backoff, Config, FingerStrategy, JoinError, JoinReport, LatencyModel, LookupError,
    NeighborSelection, NeighborStrategy, NodeView, RoutingMode, Rpc, SuccessorStrategy,
};
