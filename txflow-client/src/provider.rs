//! Provider glue: routing locations to transaction providers and the
//! local-node provider built on the pluggable engine.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use async_trait::async_trait;
use url::Url;

use txflow_core::{Result, SimpleXid, TransactionError};

use crate::channel::TransactionChannel;
use crate::engine::{EngineTransaction, TransactionEngine, XaTerminator};
use crate::registry::{Clock, ImportRegistry, MonotonicClock};

/// A provider able to reach remote transaction peers for one or more
/// URI schemes.
#[async_trait]
pub trait RemoteTransactionProvider: Send + Sync + 'static {
    /// Returns a channel connected to the peer at `location`.
    async fn channel_for(&self, location: &Url) -> Result<Arc<TransactionChannel>>;
}

/// The process-wide registry of remote transaction providers, keyed by
/// URI scheme.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn RemoteTransactionProvider>>>,
}

static GLOBAL_PROVIDERS: OnceLock<ProviderRegistry> = OnceLock::new();

impl ProviderRegistry {
    /// Returns the process-wide registry.
    pub fn global() -> &'static ProviderRegistry {
        GLOBAL_PROVIDERS.get_or_init(|| ProviderRegistry {
            providers: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a provider for a URI scheme.
    ///
    /// Fails when the scheme already has a provider.
    pub fn register(
        &self,
        scheme: &str,
        provider: Arc<dyn RemoteTransactionProvider>,
    ) -> Result<()> {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(scheme) {
            return Err(TransactionError::Configuration(format!(
                "a provider is already registered for scheme \"{scheme}\""
            )));
        }
        providers.insert(scheme.to_string(), provider);
        tracing::debug!(scheme, "registered remote transaction provider");
        Ok(())
    }

    /// Returns the provider able to reach `location`.
    pub fn provider_for(&self, location: &Url) -> Result<Arc<dyn RemoteTransactionProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location.scheme())
            .cloned()
            .ok_or_else(|| TransactionError::NoProviderForUri(location.clone()))
    }

    /// Returns the provider registered for `scheme`.
    pub fn provider_for_scheme(&self, scheme: &str) -> Result<Arc<dyn RemoteTransactionProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheme)
            .cloned()
            .ok_or_else(|| TransactionError::UnknownProvider(scheme.to_string()))
    }
}

const UID_LEN: usize = 28;

/// Extracts the coordinating node name encoded in a transaction id.
///
/// For the format ids that embed one, the global transaction id is a
/// 28-byte UID followed by the UTF-8 node name; shorter ids carry no
/// name, as do other format ids.
pub fn name_from_xid(xid: &SimpleXid) -> Option<String> {
    match xid.format_id() {
        0x20000 | 0x20005 | 0x20008 => {
            let global_id = xid.global_id();
            if global_id.len() <= UID_LEN {
                // no parent name encoded there
                None
            } else {
                Some(String::from_utf8_lossy(&global_id[UID_LEN..]).into_owned())
            }
        }
        _ => None,
    }
}

/// The transaction provider for the local node: drives the pluggable
/// engine for locally coordinated transactions and indexes the ones
/// imported from peers.
pub struct LocalTransactionProvider {
    engine: Arc<dyn TransactionEngine>,
    registry: ImportRegistry,
}

impl LocalTransactionProvider {
    /// Starts building a provider.
    pub fn builder() -> LocalTransactionProviderBuilder {
        LocalTransactionProviderBuilder {
            stale_transaction_time: 600,
            engine: None,
            terminator: None,
            clock: None,
        }
    }

    /// Returns the imported-transaction registry.
    pub fn registry(&self) -> &ImportRegistry {
        &self.registry
    }

    /// Returns the underlying engine.
    pub fn engine(&self) -> &Arc<dyn TransactionEngine> {
        &self.engine
    }

    /// Begins a new locally coordinated transaction with the given
    /// timeout in seconds (zero uses the engine default) and registers
    /// it under its gtid.
    pub fn create_new_transaction(&self, timeout: i32) -> Result<Arc<dyn EngineTransaction>> {
        if timeout < 0 {
            return Err(TransactionError::NegativeTransactionTimeout);
        }
        let engine = &self.engine;
        let old_timeout = engine.transaction_timeout();
        engine.set_transaction_timeout(timeout as u32);
        let suspended = engine.suspend();
        let begun: std::result::Result<Arc<dyn EngineTransaction>, txflow_core::EngineError> =
            (|| {
                engine.begin()?;
                engine.suspend().ok_or_else(|| {
                    txflow_core::EngineError::System(
                        "engine produced no transaction on begin".to_string(),
                    )
                })
            })();
        match begun {
            Ok(transaction) => {
                engine.set_transaction_timeout(old_timeout);
                let gtid = transaction.xid().without_branch();
                let entry = self.registry.entry_for(&transaction, gtid.clone());
                self.registry.register(gtid, entry);
                Ok(transaction)
            }
            Err(error) => {
                if let Some(previous) = suspended {
                    if let Err(resume_error) = engine.resume(&previous) {
                        tracing::warn!(error = %resume_error, "failed to resume suspended transaction");
                    }
                }
                engine.set_transaction_timeout(old_timeout);
                Err(error.into())
            }
        }
    }

    /// Commits a locally coordinated transaction through its entry's
    /// completion interlock.
    pub fn commit_local(&self, transaction: &Arc<dyn EngineTransaction>) -> Result<()> {
        let gtid = transaction.xid().without_branch();
        self.registry.entry_for(transaction, gtid).commit_local()
    }

    /// Rolls back a locally coordinated transaction through its entry's
    /// completion interlock.
    pub fn rollback_local(&self, transaction: &Arc<dyn EngineTransaction>) -> Result<()> {
        let gtid = transaction.xid().without_branch();
        self.registry.entry_for(transaction, gtid).rollback_local()
    }

    /// Drops a transaction's entry and expiration key from the index.
    pub fn drop_local(&self, transaction: &Arc<dyn EngineTransaction>) {
        self.registry.remove(&transaction.xid().without_branch());
    }

    /// Returns the node name the engine identifies as.
    pub fn node_name(&self) -> Result<String> {
        self.engine.node_name().ok_or(TransactionError::NoNodeName)
    }
}

impl std::fmt::Debug for LocalTransactionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransactionProvider")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`LocalTransactionProvider`].
pub struct LocalTransactionProviderBuilder {
    stale_transaction_time: u32,
    engine: Option<Arc<dyn TransactionEngine>>,
    terminator: Option<Arc<dyn XaTerminator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl LocalTransactionProviderBuilder {
    /// Sets the stale-transaction window in seconds (minimum 1,
    /// default 600): how long completed gtids stay resolvable for late
    /// peer queries.
    pub fn stale_transaction_time(mut self, seconds: u32) -> Self {
        self.stale_transaction_time = seconds;
        self
    }

    /// Sets the local transaction engine (required).
    pub fn engine(mut self, engine: Arc<dyn TransactionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the engine-side XA terminator (required).
    pub fn terminator(mut self, terminator: Arc<dyn XaTerminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Overrides the registry clock; tests use this for deterministic
    /// eviction.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the provider.
    pub fn build(self) -> Result<LocalTransactionProvider> {
        if self.stale_transaction_time < 1 {
            return Err(TransactionError::Configuration(
                "stale transaction time must be at least one second".to_string(),
            ));
        }
        let engine = self
            .engine
            .ok_or_else(|| TransactionError::Configuration("engine is required".to_string()))?;
        let terminator = self.terminator.ok_or_else(|| {
            TransactionError::Configuration("terminator is required".to_string())
        })?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        Ok(LocalTransactionProvider {
            engine,
            registry: ImportRegistry::new(self.stale_transaction_time, terminator, clock),
        })
    }
}
