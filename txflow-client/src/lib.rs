//! Client-side machinery for flat two-phase-commit transactions that
//! span a local node and remote peers.
//!
//! Built on [Tokio](https://tokio.rs/); every operation that reaches a
//! peer is an `async fn`. The transport itself is pluggable: anything
//! that moves framed bytes implements [`Transport`], and the
//! [`TransactionChannel`] layers request correlation and lifecycle
//! tracking on top.
//!
//! # Driving a remote transaction
//!
//! ```ignore
//! use txflow_client::TransactionChannel;
//!
//! let channel = TransactionChannel::open(transport, location, 0);
//! let txn = channel.new_transaction();
//! txn.begin(30).await?;
//! // ... perform work against the peer ...
//! txn.commit().await?;
//! ```
//!
//! # Outflowing a branch into a local transaction
//!
//! ```ignore
//! use txflow_client::SubordinateXaResource;
//!
//! let resource = Arc::new(SubordinateXaResource::new(location, "node-a"));
//! let handle = resource.add_handle(xid)?;
//! // ... hand the resource to the transaction manager ...
//! handle.verify_enlistment()?;
//! ```

#![warn(missing_docs)]

pub mod channel;
pub mod control;
pub mod engine;
pub mod invocation;
mod outflow;
pub mod provider;
pub mod registry;
pub mod remote;
pub mod subordinate;

pub use channel::{TransactionChannel, Transport};
pub use control::{PeerXaControl, SubordinateControl};
pub use invocation::{Invocation, InvocationTracker};
pub use provider::{
    name_from_xid, LocalTransactionProvider, ProviderRegistry, RemoteTransactionProvider,
};
pub use registry::{Clock, ImportRegistry, ImportResult, ImportedEntry, MonotonicClock, XidKey};
pub use remote::{RemoteTransactionHandle, TransactionStatus};
pub use subordinate::{SubordinateXaResource, XaOutflowHandle};
