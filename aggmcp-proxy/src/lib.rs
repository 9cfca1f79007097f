pub mod aggregator;
pub mod capabilities;
pub mod connection;
pub mod connection_manager;
pub mod context;
pub mod error;
pub mod filter;
pub mod instructions;
pub mod notify_router;
pub mod oauth;
pub mod presets;
pub mod reload;
pub mod session;
pub mod transport;

pub use aggregator::Aggmcp;
pub use capabilities::{AggregateCapabilities, CapabilityAggregator, CapabilityChangeSet, ConnectionCapabilities, Provided};
pub use connection::{ConnectionStatus, OutboundConnection};
pub use connection_manager::ConnectionManager;
pub use context::ContextPropagator;
pub use error::{ProxyError, ProxyResult};
pub use filter::{apply_filter, parse_tag_expression, resolve_query, FilterError, FilteredCapabilities, ResolvedQuery, TagExpr};
pub use instructions::InstructionAggregator;
pub use notify_router::{InboundSink, NotificationRouter, OutboundNotification, OutboundSink};
pub use oauth::{OAuthProvider, OAuthTokens};
pub use presets::PresetStore;
pub use reload::{ReloadEngine, ReloadEvent, ReloadOptions, ReloadOutcome, ReloadState, ReloadStrategy};
pub use session::{SessionRecord, SessionStore, SessionStoreConfig, TagFilterMode};
pub use transport::{BuiltTransport, TransportAttributes, TransportFactory};
