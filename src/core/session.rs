//! Engine sessions
//!
//! A [`Session`] owns one engine handle and the transaction status for it.
//! Every other operation in the crate runs against a session.
//!
//! Transaction operations return a `Result` and also record their outcome in
//! [`Session::transaction_status`], so callers that ignore the return value
//! can still inspect what happened.
//!
//! Closing (explicitly or by dropping) aborts a transaction that is still in
//! progress before the handle is released.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::arena::Arena;
use crate::core::engine::{Engine, SessionHandle};
use crate::core::enumerate::RuleEnumerator;
use crate::core::error::{EngineError, Error, Result};
use crate::core::native::{
    FilterDescriptor, Guid, ProviderDescriptor, SessionDescriptor, SublayerDescriptor,
    SublayerEnumTemplate,
};
use crate::core::transaction::{Transaction, TransactionStatus};
use crate::core::types::{
    FilterEnumFlags, FilterEnumType, Layer, LayerId, Provider, ProviderId, Rule, RuleId,
    Sublayer, SublayerId, TransactionFlags,
};

/// Used when [`Options::transaction_start_timeout`] is zero.
pub const DEFAULT_TRANSACTION_START_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Longest wait a session will request for the transaction lock.
pub const MAX_TRANSACTION_START_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Session construction options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub name: String,
    pub description: String,
    /// The engine deletes everything this session added when it closes.
    pub dynamic: bool,
    /// Begin a transaction as part of [`Session::open`].
    pub start_transaction: bool,
    pub transaction_flags: TransactionFlags,
    /// How long a begin may wait for another session's transaction. Zero
    /// selects [`DEFAULT_TRANSACTION_START_TIMEOUT`].
    pub transaction_start_timeout: Duration,
}

impl Options {
    /// The timeout actually sent to the engine.
    pub fn effective_transaction_start_timeout(&self) -> Duration {
        match self.transaction_start_timeout {
            Duration::ZERO => DEFAULT_TRANSACTION_START_TIMEOUT,
            timeout if timeout > MAX_TRANSACTION_START_TIMEOUT => {
                warn!(
                    requested_secs = timeout.as_secs(),
                    max_secs = MAX_TRANSACTION_START_TIMEOUT.as_secs(),
                    "transaction start timeout clamped"
                );
                MAX_TRANSACTION_START_TIMEOUT
            }
            timeout => timeout,
        }
    }
}

pub struct Session {
    engine: Arc<dyn Engine>,
    /// `None` once closed.
    handle: Option<SessionHandle>,
    name: String,
    dynamic: bool,
    transaction: Transaction,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("dynamic", &self.dynamic)
            .field("transaction", &self.transaction.status())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a session, optionally beginning a transaction.
    ///
    /// If the transaction cannot be started (for example another session
    /// holds the lock past the timeout) the handle is released again and
    /// [`Error::TransactionStart`] carries the engine's code.
    pub fn open(engine: Arc<dyn Engine>, options: Options) -> Result<Self> {
        let timeout = options.effective_transaction_start_timeout();
        let handle = {
            let arena = Arena::new();
            let descriptor = SessionDescriptor::new_in(
                &arena,
                &options.name,
                &options.description,
                options.dynamic,
                timeout,
            )?;
            engine.open_session(descriptor)?
        };
        info!(
            session = %handle,
            name = %options.name,
            dynamic = options.dynamic,
            "session opened"
        );

        let mut session = Self {
            engine,
            handle: Some(handle),
            name: options.name,
            dynamic: options.dynamic,
            transaction: Transaction::default(),
        };

        if options.start_transaction {
            let flags = options.transaction_flags;
            let began = session
                .transaction
                .begin(|| session.engine.begin_transaction(handle, flags));
            if let Err(source) = began {
                warn!(session = %handle, "could not start transaction: {source}");
                // Dropping releases the handle.
                drop(session);
                return Err(Error::TransactionStart { source });
            }
            info!(session = %handle, %flags, "transaction began");
        }

        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    pub(crate) fn handle(&self) -> Result<SessionHandle> {
        self.handle.ok_or(Error::Engine(EngineError::NilPointer))
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Releases the handle, aborting an in-progress transaction first.
    ///
    /// Both steps are attempted even if the abort fails; the first failure is
    /// returned. Closing an already closed session does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let aborted = self
            .transaction
            .close(|| self.engine.abort_transaction(handle));
        if let Err(e) = &aborted {
            warn!(session = %handle, "abort during close failed: {e}");
        }
        let closed = self.engine.close_session(handle);
        if let Err(e) = &closed {
            warn!(session = %handle, "close failed: {e}");
        }

        info!(
            session = %handle,
            transaction = %self.transaction.status().state,
            "session closed"
        );
        aborted.and(closed).map_err(Error::from)
    }

    // ═══════════════════════════════════════════════════════════════
    // Transactions
    // ═══════════════════════════════════════════════════════════════

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction.status()
    }

    pub fn begin_transaction(&mut self, flags: TransactionFlags) -> Result<()> {
        let result = match self.handle {
            Some(handle) => self
                .transaction
                .begin(|| self.engine.begin_transaction(handle, flags)),
            None => self.transaction.reject(EngineError::NilPointer),
        };
        self.log_transition("begin", &result);
        result.map_err(Error::from)
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        let result = match self.handle {
            Some(handle) => self
                .transaction
                .commit(|| self.engine.commit_transaction(handle)),
            None => self.transaction.reject(EngineError::NilPointer),
        };
        self.log_transition("commit", &result);
        result.map_err(Error::from)
    }

    pub fn abort_transaction(&mut self) -> Result<()> {
        let result = match self.handle {
            Some(handle) => self
                .transaction
                .abort(|| self.engine.abort_transaction(handle)),
            None => self.transaction.reject(EngineError::NilPointer),
        };
        self.log_transition("abort", &result);
        result.map_err(Error::from)
    }

    fn log_transition(&self, op: &str, result: &std::result::Result<(), EngineError>) {
        let state = self.transaction.status().state;
        match result {
            Ok(()) => info!(session = %self.name, op, %state, "transaction"),
            Err(e) => debug!(session = %self.name, op, %state, "transaction rejected: {e}"),
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Engine objects
    // ═══════════════════════════════════════════════════════════════

    pub fn layers(&self) -> Result<Vec<Layer>> {
        Ok(self.engine.layers(self.handle()?)?)
    }

    /// Lists sublayers, optionally only those owned by `provider`.
    pub fn sublayers(&self, provider: Option<ProviderId>) -> Result<Vec<Sublayer>> {
        let handle = self.handle()?;
        let arena = Arena::new();
        let template = SublayerEnumTemplate::new_in(&arena, provider);
        Ok(self.engine.sublayers(handle, template)?)
    }

    pub fn add_sublayer(&mut self, sublayer: &Sublayer) -> Result<()> {
        let handle = self.handle()?;
        let arena = Arena::new();
        let descriptor = SublayerDescriptor::new_in(&arena, sublayer)?;
        self.engine.add_sublayer(handle, descriptor)?;
        debug!(id = %sublayer.id, name = %sublayer.name, "sublayer added");
        Ok(())
    }

    pub fn delete_sublayer(&mut self, id: SublayerId) -> Result<()> {
        self.engine
            .delete_sublayer(self.handle()?, &Guid::from(Uuid::from(id)))?;
        debug!(%id, "sublayer deleted");
        Ok(())
    }

    pub fn providers(&self) -> Result<Vec<Provider>> {
        Ok(self.engine.providers(self.handle()?)?)
    }

    pub fn add_provider(&mut self, provider: &Provider) -> Result<()> {
        let handle = self.handle()?;
        let arena = Arena::new();
        let descriptor = ProviderDescriptor::new_in(&arena, provider)?;
        self.engine.add_provider(handle, descriptor)?;
        debug!(id = %provider.id, name = %provider.name, "provider added");
        Ok(())
    }

    pub fn delete_provider(&mut self, id: ProviderId) -> Result<()> {
        self.engine
            .delete_provider(self.handle()?, &Guid::from(Uuid::from(id)))?;
        debug!(%id, "provider deleted");
        Ok(())
    }

    /// Adds a rule. On success `rule.id` holds the rule's key (assigned by
    /// the engine if it was nil) and `rule.kernel_id` its runtime id.
    pub fn add_rule(&mut self, rule: &mut Rule) -> Result<()> {
        let handle = self.handle()?;
        let (key, kernel_id) = {
            let arena = Arena::new();
            let descriptor = FilterDescriptor::new_in(&arena, rule)?;
            self.engine.add_filter(handle, descriptor)?
        };
        rule.id = RuleId::from(Uuid::from(key));
        rule.kernel_id = kernel_id;
        debug!(id = %rule.id, kernel_id, name = %rule.name, "rule added");
        Ok(())
    }

    pub fn delete_rule(&mut self, id: RuleId) -> Result<()> {
        self.engine
            .delete_filter(self.handle()?, &Guid::from(Uuid::from(id)))?;
        debug!(%id, "rule deleted");
        Ok(())
    }

    /// Starts building a rule enumeration. A nil `layer` covers all layers.
    pub fn enumerate_rules(&self, enum_type: FilterEnumType, layer: LayerId) -> RuleEnumerator<'_> {
        RuleEnumerator::new(self, enum_type, layer)
    }

    /// Every rule in every layer, including disabled and boot-time rules.
    pub fn rules(&self) -> Result<Vec<Rule>> {
        self.enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
            .with_flags(FilterEnumFlags::INCLUDE_DISABLED | FilterEnumFlags::INCLUDE_BOOT_TIME)
            .execute()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(session = %self.name, "teardown failed: {e}");
        }
    }
}
