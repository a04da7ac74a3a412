//! devlink: real-time JSON-RPC 2.0 link to remote camera and device rigs
//!
//! This is the convenience crate that re-exports the devlink sub-crates.
//!
//! # Architecture
//!
//! - **devlink-core**: wire types, frame codec, error taxonomy, observability
//! - **devlink-client**: connection manager with calls, notifications,
//!   reconnection, health scoring and the polling fallback
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use devlink::ClientBuilder;
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ClientBuilder::new()
//!         .connect("ws://192.168.1.20:8080/rpc")
//!         .await?;
//!
//!     let _status = manager.subscribe("status_update", |params| {
//!         println!("status: {}", params);
//!     });
//!
//!     let devices: Value = manager.call("get_device_list", ()).await?;
//!     println!("{}", devices);
//!     Ok(())
//! }
//! ```

pub use devlink_client as client;
pub use devlink_core as core;

pub use devlink_client::{
    ClientBuilder, ClientConfig, ConnectionEvent, ConnectionManager, ConnectionQuality,
    ConnectionSnapshot, ConnectionState, PollingMode,
};
pub use devlink_core::{Error, ErrorCode, JsonRpcErrorData, ObservabilityConfig, Result};
