//! # kanban-collab: Real-time board collaboration
//!
//! Pushes ordered-position changes to every client watching a board.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  ws   ┌──────────────┐  register   ┌───────────────┐
//! │ Client A │◄─────►│ BoardServer  │────────────►│      Hub      │
//! └──────────┘       │  Admission   │             │ board → rooms │
//! ┌──────────┐  ws   │  Connection  │◄────────────│  (one task)   │
//! │ Client B │◄─────►│ write / read │  Arc<str>   └───────▲───────┘
//! └──────────┘       └──────────────┘                     │ broadcast
//!                                                         │
//!          BoardMutations ──► OrderingEngine ──► PositionStore
//!          PositionNormalizer ──┘ (periodic repair sweep)
//! ```
//!
//! ## Modules
//!
//! - [`event`]: `{event, data}` wire envelope and payloads
//! - [`hub`]: room registry and fan-out with slow-consumer eviction
//! - [`connection`]: per-socket write and read duties
//! - [`admission`]: who may subscribe to a board
//! - [`server`]: WebSocket accept loop at `/ws/board/{id}`
//! - [`mutations`]: create / move / delete, then broadcast
//! - [`normalizer`]: background position repair
//! - [`config`]: defaults and `KANBAN_*` environment overrides

pub mod event;
pub mod hub;
pub mod connection;
pub mod admission;
pub mod server;
pub mod mutations;
pub mod normalizer;
pub mod config;

pub use event::{ChangeEvent, Deleted, EventKind, MemberPresence, PositionChanged};
pub use hub::{ConnectionId, Hub, HubConfig, HubError, HubHandle, HubStats, Subscriber};
pub use connection::{Connection, ConnectionConfig, ConnectionError};
pub use admission::{Admission, AdmissionError, StaticAdmission};
pub use server::{BoardServer, ServerConfig, ServerError, ServerStats};
pub use mutations::BoardMutations;
pub use normalizer::{NormalizerConfig, PositionNormalizer, SweepReport, MIN_INTERVAL};
pub use config::{CollabConfig, ConfigError};
