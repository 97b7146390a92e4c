//! Sluice SDK
//!
//! High level API over `sluice_runtime` for serving GraphQL subscriptions.
//!
//! # Subscription service
//!
//! ```ignore
//! use sluice_sdk::{Context, PubSub, SubscriptionService};
//!
//! let pubsub = PubSub::new();
//! let service = SubscriptionService::builder()
//!     .schema(schema)
//!     .pubsub(pubsub.clone())
//!     .topic("messages", |args| args.get_as::<String>("room").unwrap_or_default())
//!     .build()?;
//!
//! let response = service
//!     .subscribe(document, None, IndexMap::new(), Context::new())
//!     .await?;
//!
//! pubsub.publish("lobby", json!({ "id": "1", "body": "hi" })).await;
//! ```

pub mod error;
pub mod pubsub;
pub mod service;

pub use error::{ErrorCode, ResultExt, SdkError, SdkResult};
pub use pubsub::{PubSub, TypedPubSub};
pub use service::{ServiceBuilder, ServiceConfig, SubscriptionService};

// Re-export runtime types that are commonly needed
pub use sluice_runtime::{
    Context, Document, EventStream, EventStreamError, ExecutorConfig, FieldError,
    Instrumentation, ResolverArgs, ResolverError, ResolverInfo, ResolverMap, Response,
    ResponseStream, Schema, SubscriptionConfig, SubscriptionResponse,
};
