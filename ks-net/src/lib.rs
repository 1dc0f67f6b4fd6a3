#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_many_arguments)]

//! A layer-graph inference runtime.
//!
//! A network is described by a JSON [NetworkParam](param::NetworkParam): an ordered list of nodes
//! that consume and produce named tensors. Loading creates a [Layer](layer::Layer) for every node,
//! reads its weights from a separate little-endian f32 stream and links all tensor names into
//! a flat list of stages that share a single tensor table and scratch arena.
//!
//! ```no_run
//! # use ks_net::network::Network;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut network = Network::new();
//! network.load("net.json", "net.bin")?;
//!
//! // change the batch size, keep the automatically discovered outputs
//! network.reshape(&["data"], &[vec![4, 3, 224, 224]], &[])?;
//! network.forward();
//!
//! for (name, tensor) in network.dst_names().iter().zip(network.dst()) {
//!     println!("{}: {:?}", name, tensor);
//! }
//! # Ok(())
//! # }
//! ```

/// The [ndarray] crate is used for tensor storage, and re-exported for convenience.
pub use ndarray;

/// The graph description.
pub mod param;
/// Error types.
pub mod result;
/// Dynamically typed tensors.
pub mod tensor;

/// The tensor table and the scratch arena shared by all stages.
pub mod table;
/// Sequential weight stream reading.
pub mod weights;

/// The layer contract.
pub mod layer;
/// Layer construction from a description.
pub mod factory;
/// Operator implementations.
pub mod layers;

/// Name resolution and output discovery.
pub mod linker;
/// The runtime entry point.
pub mod network;

/// Detection regions and duplicate merging.
pub mod region;

/// Flush-to-zero floating point mode.
pub mod ftz;
