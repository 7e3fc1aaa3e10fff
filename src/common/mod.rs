//! Types shared by every part of the crate.

mod id;
mod messages;
mod node;
mod routing_table;

pub use id::{Id, InvalidBitWidth, RingSpace, MAX_BITS};
pub use messages::{AlertReason, LookupResult, NodeInfo, RequestSpecific, ResponseSpecific};
pub use node::{Node, NodeStatus};
pub use routing_table::RoutingTable;
