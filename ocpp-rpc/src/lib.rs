//! # OCPP RPC
//!
//! Protocol engine for OCPP-J: the JSON RPC that links a Charging Station
//! Management System (CSMS) with its charging stations over a persistent
//! duplex connection.
//!
//! The engine catalogs message types, validates every payload against its
//! declared shape, correlates outbound calls with their replies, routes
//! inbound calls to role handlers, and carries vendor `customData` through
//! untouched. It never interprets what a message means.
//!
//! ## Architecture
//!
//! ```text
//!            Transport (WebSocket / in-memory)
//!                 │ frames          ▲ frames
//!                 ▼                 │
//! ┌──────────────────────────────────────────┐
//! │  Engine: one actor per connection        │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐  │
//! │  │ Framing  │ │ Pending  │ │ Inbound  │  │
//! │  │ [2|3|4]  │ │ call +   │ │ queue    │  │
//! │  │          │ │ deadline │ │          │  │
//! │  └──────────┘ └──────────┘ └────┬─────┘  │
//! └────────────┬────────────────────┼────────┘
//!              │                    ▼
//!   ┌──────────┴─────────┐   ┌────────────┐
//!   │ Registry           │   │ Dispatcher │
//!   │ profiles → shapes  │   │ (role)     │
//!   └────────────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocpp_rpc::{profiles, Dispatcher, Engine, EngineConfig, MemoryTransport, Role};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(profiles::standard_registry()?);
//!     let dispatcher = Dispatcher::new(Role::Csms, registry);
//!     let (transport, _outbox) = MemoryTransport::new();
//!
//!     let engine = Engine::new(EngineConfig::default(), dispatcher, transport);
//!     engine.on_connected("CS001");
//!
//!     let handle = engine
//!         .send("CS001", "CostUpdated", json!({"totalCost": 4.2, "transactionId": "tx-1"}))
//!         .await?;
//!     let response = handle.await?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod custom_data;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod messages;
pub mod profiles;
pub mod registry;
pub mod transport;
pub mod types;
pub mod validate;
pub mod ws;

pub use config::{EngineConfig, WsConfig};
pub use custom_data::{CodecError, CustomData};
pub use dispatch::{Dispatcher, Handler};
pub use engine::{CallHandle, Engine};
pub use error::{HandlerError, RegistryError, RpcError, TransportError};
pub use messages::{Call, CallError, CallResult, ErrorCode, FrameError, Message};
pub use registry::{Direction, Feature, Profile, Registry, Role};
pub use transport::{MemoryTransport, Transport};
pub use types::Request;
pub use validate::{validate, Field, Kind, Rule, Shape, Violation, ViolationKind};
pub use ws::WsTransport;
