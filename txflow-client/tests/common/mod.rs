//! Common test fixtures: a scripted in-memory peer, a test engine and a
//! manual clock.

#![allow(dead_code)]

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use txflow_client::engine::{
    EngineTransaction, PrepareOutcome, Synchronization, TransactionEngine, XaTerminator,
};
use txflow_client::{
    Clock, ProviderRegistry, RemoteTransactionProvider, TransactionChannel, TransactionStatus,
    Transport,
};
use txflow_core::protocol::constants::M_RESP_BIT;
use txflow_core::protocol::{MessageBuilder, WireMessage};
use txflow_core::{EngineError, Result, SimpleXid, XaError};

static SCHEME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a URI scheme unique to this test, so tests can share the
/// process-wide provider registry without colliding.
pub fn unique_scheme(prefix: &str) -> String {
    let id = SCHEME_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), id)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted parameter of a peer reply.
pub enum ReplyParam {
    Flag(u8),
    Uint(u8, u32),
    Xid(u8, SimpleXid),
}

/// What the scripted peer does with the next request.
pub enum Reply {
    /// Respond with the paired response opcode and no parameters.
    Ok,
    /// Respond with the paired response opcode and these parameters.
    Params(Vec<ReplyParam>),
    /// Respond with a specific opcode and no parameters.
    Opcode(u8),
    /// Never respond.
    Ignore,
}

/// An in-memory transport whose peer side replies from a script.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<Bytes>>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    fail_sends: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Scripts the peer's reaction to the next unscripted request.
    pub fn enqueue(&self, reply: Reply) {
        lock(&self.replies).push_back(reply);
    }

    /// All frames the client has sent, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        lock(&self.sent).clone()
    }

    /// All requests the client has sent, parsed.
    pub fn sent_messages(&self) -> Vec<WireMessage> {
        self.sent_frames()
            .into_iter()
            .map(|frame| WireMessage::parse(frame).expect("client sent an unparseable frame"))
            .collect()
    }

    /// Makes every subsequent send fail.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Closes the peer side; the channel observes an orderly close.
    pub fn close(&self) {
        lock(&self.inbound_tx).take();
    }

    /// Injects a raw inbound frame, bypassing the script.
    pub fn inject(&self, frame: Bytes) {
        if let Some(tx) = lock(&self.inbound_tx).as_ref() {
            let _ = tx.send(frame);
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, frame: Bytes) -> io::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted send failure"));
        }
        let request =
            WireMessage::parse(frame.clone()).map_err(|_| io::ErrorKind::InvalidData)?;
        lock(&self.sent).push(frame);
        let reply = lock(&self.replies).pop_front();
        let response = match reply {
            None | Some(Reply::Ignore) => return Ok(()),
            Some(Reply::Ok) => {
                MessageBuilder::new(request.request_id(), request.opcode() | M_RESP_BIT).finish()
            }
            Some(Reply::Opcode(opcode)) => {
                MessageBuilder::new(request.request_id(), opcode).finish()
            }
            Some(Reply::Params(params)) => {
                let mut builder =
                    MessageBuilder::new(request.request_id(), request.opcode() | M_RESP_BIT);
                for param in params {
                    match param {
                        ReplyParam::Flag(id) => builder.put_flag_param(id),
                        ReplyParam::Uint(id, value) => builder.put_uint_param(id, value),
                        ReplyParam::Xid(id, xid) => builder.put_xid_param(id, &xid),
                    }
                }
                builder.finish()
            }
        };
        self.inject(response);
        Ok(())
    }

    async fn recv(&self) -> io::Result<Option<Bytes>> {
        let mut rx = self.inbound_rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// Opens a channel over a scripted transport.
pub fn open_channel(
    transport: &Arc<ScriptedTransport>,
    url: &str,
    peer_identity_id: u32,
) -> Arc<TransactionChannel> {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    TransactionChannel::open(transport, Url::parse(url).expect("test url"), peer_identity_id)
}

/// A provider that always hands out the same channel.
pub struct StaticProvider {
    channel: Arc<TransactionChannel>,
}

impl StaticProvider {
    pub fn new(channel: Arc<TransactionChannel>) -> Arc<Self> {
        Arc::new(Self { channel })
    }
}

#[async_trait]
impl RemoteTransactionProvider for StaticProvider {
    async fn channel_for(&self, _location: &Url) -> Result<Arc<TransactionChannel>> {
        Ok(Arc::clone(&self.channel))
    }
}

/// Registers a static provider under a fresh scheme and returns a
/// location URL using it.
pub fn register_channel(channel: Arc<TransactionChannel>, prefix: &str) -> Url {
    let scheme = unique_scheme(prefix);
    ProviderRegistry::global()
        .register(&scheme, StaticProvider::new(channel))
        .expect("fresh scheme");
    Url::parse(&format!("{scheme}://peer.example:7777/")).expect("test url")
}

/// A clock the test advances by hand.
pub struct ManualClock {
    ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ns: AtomicU64::new(1),
        })
    }

    pub fn advance_secs(&self, seconds: u64) {
        self.ns
            .fetch_add(seconds * 1_000_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }
}

type EngineCallResult = std::result::Result<(), EngineError>;

/// A scriptable engine transaction that records the `do_*` calls made
/// against it.
pub struct TestTransaction {
    xid: SimpleXid,
    timeout: u32,
    imported: bool,
    activated: AtomicBool,
    status: Mutex<TransactionStatus>,
    resources: Mutex<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    synchronizations: Mutex<Vec<Arc<dyn Synchronization>>>,
    calls: Mutex<Vec<&'static str>>,
    prepare_outcome: Mutex<PrepareOutcome>,
    before_result: Mutex<std::result::Result<bool, EngineError>>,
    commit_result: Mutex<std::result::Result<bool, EngineError>>,
    one_phase_result: Mutex<EngineCallResult>,
    rollback_result: Mutex<EngineCallResult>,
    forget_result: Mutex<EngineCallResult>,
    deferred: Mutex<Vec<EngineError>>,
}

impl TestTransaction {
    pub fn imported(xid: SimpleXid, timeout: u32) -> Arc<Self> {
        Self::build(xid, timeout, true)
    }

    pub fn local(xid: SimpleXid, timeout: u32) -> Arc<Self> {
        Self::build(xid, timeout, false)
    }

    fn build(xid: SimpleXid, timeout: u32, imported: bool) -> Arc<Self> {
        Arc::new(Self {
            xid,
            timeout,
            imported,
            activated: AtomicBool::new(true),
            status: Mutex::new(TransactionStatus::Active),
            resources: Mutex::new(HashMap::new()),
            synchronizations: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            prepare_outcome: Mutex::new(PrepareOutcome::Ok),
            before_result: Mutex::new(Ok(true)),
            commit_result: Mutex::new(Ok(true)),
            one_phase_result: Mutex::new(Ok(())),
            rollback_result: Mutex::new(Ok(())),
            forget_result: Mutex::new(Ok(())),
            deferred: Mutex::new(Vec::new()),
        })
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::SeqCst);
    }

    pub fn set_prepare_outcome(&self, outcome: PrepareOutcome) {
        *lock(&self.prepare_outcome) = outcome;
    }

    pub fn set_commit_result(&self, result: std::result::Result<bool, EngineError>) {
        *lock(&self.commit_result) = result;
    }

    pub fn set_one_phase_result(&self, result: EngineCallResult) {
        *lock(&self.one_phase_result) = result;
    }

    pub fn set_rollback_result(&self, result: EngineCallResult) {
        *lock(&self.rollback_result) = result;
    }

    pub fn set_forget_result(&self, result: EngineCallResult) {
        *lock(&self.forget_result) = result;
    }

    pub fn set_deferred(&self, deferred: Vec<EngineError>) {
        *lock(&self.deferred) = deferred;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: &'static str) {
        lock(&self.calls).push(call);
    }

    /// Completes the transaction, firing registered synchronizations.
    pub fn complete(&self, status: TransactionStatus) {
        *lock(&self.status) = status;
        let synchronizations = lock(&self.synchronizations).clone();
        for sync in synchronizations {
            sync.after_completion(status);
        }
    }
}

impl EngineTransaction for TestTransaction {
    fn commit(&self) -> EngineCallResult {
        self.record("commit");
        lock(&self.commit_result).clone().map(|_| ())
    }

    fn rollback(&self) -> EngineCallResult {
        self.record("rollback");
        lock(&self.rollback_result).clone()
    }

    fn set_rollback_only(&self) -> EngineCallResult {
        self.record("set_rollback_only");
        *lock(&self.status) = TransactionStatus::MarkedRollback;
        Ok(())
    }

    fn status(&self) -> TransactionStatus {
        *lock(&self.status)
    }

    fn xid(&self) -> SimpleXid {
        self.xid.clone()
    }

    fn timeout(&self) -> u32 {
        self.timeout
    }

    fn imported(&self) -> bool {
        self.imported
    }

    fn activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    fn register_interposed_synchronization(&self, sync: Arc<dyn Synchronization>) {
        lock(&self.synchronizations).push(sync);
    }

    fn put_tx_resource(&self, key: &'static str, value: Arc<dyn Any + Send + Sync>) {
        lock(&self.resources).insert(key, value);
    }

    fn tx_resource(&self, key: &'static str) -> Option<Arc<dyn Any + Send + Sync>> {
        lock(&self.resources).get(key).cloned()
    }

    fn do_before_completion(&self) -> std::result::Result<bool, EngineError> {
        self.record("do_before_completion");
        lock(&self.before_result).clone()
    }

    fn do_prepare(&self) -> PrepareOutcome {
        self.record("do_prepare");
        *lock(&self.prepare_outcome)
    }

    fn do_commit(&self) -> std::result::Result<bool, EngineError> {
        self.record("do_commit");
        lock(&self.commit_result).clone()
    }

    fn do_one_phase_commit(&self) -> EngineCallResult {
        self.record("do_one_phase_commit");
        lock(&self.one_phase_result).clone()
    }

    fn do_rollback(&self) -> EngineCallResult {
        self.record("do_rollback");
        lock(&self.rollback_result).clone()
    }

    fn do_forget(&self) -> EngineCallResult {
        self.record("do_forget");
        lock(&self.forget_result).clone()
    }

    fn deferred_throwables(&self) -> Vec<EngineError> {
        lock(&self.deferred).clone()
    }
}

/// A terminator backed by a map of scripted transactions.
pub struct TestTerminator {
    transactions: Mutex<HashMap<SimpleXid, Arc<TestTransaction>>>,
    removed: Mutex<Vec<SimpleXid>>,
    recovery: Mutex<Vec<SimpleXid>>,
    import_timeout: u32,
}

impl TestTerminator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transactions: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            recovery: Mutex::new(Vec::new()),
            import_timeout: 60,
        })
    }

    /// Pre-seeds a transaction the terminator will hand out for `xid`.
    pub fn seed(&self, xid: &SimpleXid, transaction: Arc<TestTransaction>) {
        lock(&self.transactions).insert(xid.without_branch(), transaction);
    }

    pub fn removed(&self) -> Vec<SimpleXid> {
        lock(&self.removed).clone()
    }

    pub fn set_recovery(&self, xids: Vec<SimpleXid>) {
        *lock(&self.recovery) = xids;
    }

    pub fn transaction(&self, xid: &SimpleXid) -> Option<Arc<TestTransaction>> {
        lock(&self.transactions).get(&xid.without_branch()).cloned()
    }
}

impl XaTerminator for TestTerminator {
    fn import_transaction(
        &self,
        xid: &SimpleXid,
        timeout: u32,
    ) -> std::result::Result<(Arc<dyn EngineTransaction>, bool), XaError> {
        let mut transactions = lock(&self.transactions);
        let gtid = xid.without_branch();
        if let Some(existing) = transactions.get(&gtid) {
            return Ok((Arc::clone(existing) as Arc<dyn EngineTransaction>, false));
        }
        let transaction = TestTransaction::imported(xid.clone(), timeout);
        transactions.insert(gtid, Arc::clone(&transaction));
        Ok((transaction as Arc<dyn EngineTransaction>, true))
    }

    fn get_transaction(
        &self,
        xid: &SimpleXid,
    ) -> std::result::Result<Option<Arc<dyn EngineTransaction>>, XaError> {
        Ok(lock(&self.transactions)
            .get(&xid.without_branch())
            .map(|transaction| Arc::clone(transaction) as Arc<dyn EngineTransaction>))
    }

    fn remove_imported_transaction(&self, gtid: &SimpleXid) {
        lock(&self.removed).push(gtid.clone());
        lock(&self.transactions).remove(gtid);
    }

    fn do_recover(
        &self,
        _xid: Option<&SimpleXid>,
        _parent_name: &str,
    ) -> std::result::Result<Vec<SimpleXid>, XaError> {
        Ok(lock(&self.recovery).clone())
    }
}

/// A minimal engine with a single association slot.
pub struct TestEngine {
    current: Mutex<Option<Arc<TestTransaction>>>,
    default_timeout: AtomicU32,
    node_name: Option<String>,
}

impl TestEngine {
    pub fn new(node_name: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
            default_timeout: AtomicU32::new(300),
            node_name: node_name.map(str::to_string),
        })
    }
}

impl TransactionEngine for TestEngine {
    fn begin(&self) -> EngineCallResult {
        let timeout = self.default_timeout.load(Ordering::SeqCst);
        let transaction = TestTransaction::local(SimpleXid::generate(0x20000), timeout);
        *lock(&self.current) = Some(transaction);
        Ok(())
    }

    fn suspend(&self) -> Option<Arc<dyn EngineTransaction>> {
        lock(&self.current)
            .take()
            .map(|transaction| transaction as Arc<dyn EngineTransaction>)
    }

    fn resume(&self, _transaction: &Arc<dyn EngineTransaction>) -> EngineCallResult {
        Ok(())
    }

    fn transaction_timeout(&self) -> u32 {
        self.default_timeout.load(Ordering::SeqCst)
    }

    fn set_transaction_timeout(&self, seconds: u32) {
        self.default_timeout.store(seconds, Ordering::SeqCst);
    }

    fn node_name(&self) -> Option<String> {
        self.node_name.clone()
    }
}
