//! In-process filtering engine
//!
//! [`MemoryEngine`] implements [`Engine`] entirely in memory with the same
//! observable behaviour callers rely on from the kernel engine:
//!
//! - One read-write transaction at a time across all sessions. A begin waits
//!   up to the session's timeout for the current holder, then fails with
//!   `Timeout`.
//! - Aborting (or closing a session mid-transaction) restores every object to
//!   its state at begin.
//! - A mutation outside an explicit transaction runs as its own implicit
//!   transaction and waits for the lock the same way.
//! - Objects added from a dynamic session are removed when it closes.
//! - Enumeration cursors snapshot their matches when created, so later
//!   mutations never shift a page boundary.
//!
//! Callouts and provider contexts are not modelled; rules may name a callout
//! key but no provider-context template ever matches.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::engine::{Engine, EngineResult, EnumHandle, SessionHandle};
use crate::core::enumerate::RuleQuery;
use crate::core::error::EngineError;
use crate::core::layers::{SUBLAYER_UNIVERSAL, builtin_layers, value_fits_field};
use crate::core::native::{
    FilterDescriptor, FilterEnumTemplate, Guid, ProviderDescriptor, SessionDescriptor,
    SublayerDescriptor, SublayerEnumTemplate,
};
use crate::core::state::EngineSnapshot;
use crate::core::types::{
    FilterEnumFlags, Layer, LayerId, Match, MatchType, MatchValue, Provider, ProviderId, Rule,
    RuleId, Sublayer, SublayerId, TransactionFlags,
};

/// Weight of the built-in universal sublayer.
const UNIVERSAL_SUBLAYER_WEIGHT: u16 = 0x8000;

/// Tags an object with the dynamic session that added it.
#[derive(Debug, Clone)]
struct Owned<T> {
    item: T,
    owner: Option<u64>,
}

/// Everything a transaction can change.
#[derive(Debug, Clone)]
struct Store {
    layers: Vec<Layer>,
    providers: Vec<Owned<Provider>>,
    sublayers: Vec<Owned<Sublayer>>,
    rules: Vec<Owned<Rule>>,
}

impl Store {
    fn with_builtins() -> Self {
        Self {
            layers: builtin_layers(),
            providers: Vec::new(),
            sublayers: vec![Owned {
                item: Sublayer {
                    id: SUBLAYER_UNIVERSAL,
                    name: "WFP Built-in Sublayer".to_string(),
                    description: "Universal sublayer".to_string(),
                    weight: UNIVERSAL_SUBLAYER_WEIGHT,
                    persistent: true,
                    ..Sublayer::default()
                },
                owner: None,
            }],
            rules: Vec::new(),
        }
    }

    fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn provider(&self, id: ProviderId) -> Option<&Provider> {
        self.providers.iter().map(|p| &p.item).find(|p| p.id == id)
    }

    fn sublayer(&self, id: SublayerId) -> Option<&Sublayer> {
        self.sublayers.iter().map(|s| &s.item).find(|s| s.id == id)
    }

    fn provider_entry(&self, id: ProviderId) -> EngineResult<&Owned<Provider>> {
        self.providers
            .iter()
            .find(|p| p.item.id == id)
            .ok_or(EngineError::ProviderNotFound)
    }

    fn sublayer_entry(&self, id: SublayerId) -> EngineResult<&Owned<Sublayer>> {
        self.sublayers
            .iter()
            .find(|s| s.item.id == id)
            .ok_or(EngineError::SublayerNotFound)
    }

    fn rule_index(&self, id: RuleId) -> Option<usize> {
        self.rules.iter().position(|r| r.item.id == id)
    }

    fn sublayer_weight(&self, id: SublayerId) -> u16 {
        self.sublayer(id).map_or(0, |s| s.weight)
    }

    fn remove_owned_by(&mut self, session: u64) -> usize {
        let before = self.rules.len() + self.sublayers.len() + self.providers.len();
        self.rules.retain(|r| r.owner != Some(session));
        self.sublayers.retain(|s| s.owner != Some(session));
        self.providers.retain(|p| p.owner != Some(session));
        before - (self.rules.len() + self.sublayers.len() + self.providers.len())
    }
}

/// Who is making a call, as far as validation cares.
#[derive(Debug, Clone, Copy)]
struct Caller {
    handle: u64,
    dynamic: bool,
}

impl Caller {
    /// Snapshot restores run as a persistent, ownerless caller.
    const SYSTEM: Self = Self {
        handle: 0,
        dynamic: false,
    };

    fn owner(self) -> Option<u64> {
        self.dynamic.then_some(self.handle)
    }

    fn check_persistence(self, persistent: bool) -> EngineResult<()> {
        if persistent && self.dynamic {
            return Err(EngineError::DynamicSessionInProgress);
        }
        Ok(())
    }

    /// An object must not outlive what it references. Persistent objects
    /// need persistent parents, and dynamic objects are only referenced
    /// from the session that added them.
    fn check_lifetime<T>(
        self,
        persistent: bool,
        parent: &Owned<T>,
        parent_persistent: bool,
    ) -> EngineResult<()> {
        let foreign = parent.owner.is_some_and(|owner| self.owner() != Some(owner));
        if foreign || (persistent && !parent_persistent) {
            return Err(EngineError::LifetimeMismatch);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct OpenTransaction {
    read_only: bool,
    /// Store contents at begin, restored on abort. `None` for read-only.
    journal: Option<Store>,
}

#[derive(Debug)]
struct SessionEntry {
    name: String,
    dynamic: bool,
    txn_wait_timeout: Duration,
    transaction: Option<OpenTransaction>,
}

#[derive(Debug)]
struct Cursor {
    session: u64,
    pending: VecDeque<Rule>,
}

#[derive(Debug)]
struct EngineState {
    store: Store,
    sessions: HashMap<u64, SessionEntry>,
    cursors: HashMap<u64, Cursor>,
    /// Session holding the read-write transaction lock.
    writer: Option<u64>,
    next_handle: u64,
    next_kernel_id: u64,
}

impl EngineState {
    fn session(&self, handle: SessionHandle) -> EngineResult<&SessionEntry> {
        self.sessions
            .get(&handle.0)
            .ok_or(EngineError::InvalidHandle)
    }

    fn session_mut(&mut self, handle: SessionHandle) -> EngineResult<&mut SessionEntry> {
        self.sessions
            .get_mut(&handle.0)
            .ok_or(EngineError::InvalidHandle)
    }

    fn caller(&self, handle: SessionHandle) -> EngineResult<Caller> {
        let session = self.session(handle)?;
        Ok(Caller {
            handle: handle.0,
            dynamic: session.dynamic,
        })
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Ends a transaction, restoring the journal if `rollback` is set.
    /// Returns whether the writer lock was released.
    fn finish_transaction(&mut self, handle: u64, txn: OpenTransaction, rollback: bool) -> bool {
        if rollback && let Some(journal) = txn.journal {
            self.store = journal;
        }
        if self.writer == Some(handle) {
            self.writer = None;
            return true;
        }
        false
    }

    // ═══════════════════════════════════════════════════════════════
    // Object validation and insertion
    // ═══════════════════════════════════════════════════════════════

    fn insert_provider(&mut self, mut provider: Provider, caller: Caller) -> EngineResult<()> {
        if provider.name.is_empty() {
            return Err(EngineError::NullDisplayName);
        }
        caller.check_persistence(provider.persistent)?;
        if provider.id.is_nil() {
            provider.id = ProviderId::new_v4();
        }
        if self.store.provider(provider.id).is_some() {
            return Err(EngineError::AlreadyExists);
        }
        self.store.providers.push(Owned {
            item: provider,
            owner: caller.owner(),
        });
        Ok(())
    }

    fn insert_sublayer(&mut self, mut sublayer: Sublayer, caller: Caller) -> EngineResult<()> {
        if sublayer.name.is_empty() {
            return Err(EngineError::NullDisplayName);
        }
        caller.check_persistence(sublayer.persistent)?;
        if sublayer.id.is_nil() {
            sublayer.id = SublayerId::new_v4();
        }
        if self.store.sublayer(sublayer.id).is_some() {
            return Err(EngineError::AlreadyExists);
        }
        if let Some(provider) = sublayer.provider {
            let parent = self.store.provider_entry(provider)?;
            caller.check_lifetime(sublayer.persistent, parent, parent.item.persistent)?;
        }
        self.store.sublayers.push(Owned {
            item: sublayer,
            owner: caller.owner(),
        });
        Ok(())
    }

    fn insert_rule(&mut self, mut rule: Rule, caller: Caller) -> EngineResult<(RuleId, u64)> {
        if rule.name.is_empty() {
            return Err(EngineError::NullDisplayName);
        }
        caller.check_persistence(rule.persistent)?;
        if rule.id.is_nil() {
            rule.id = RuleId::new_v4();
        }
        if self.store.rule_index(rule.id).is_some() {
            return Err(EngineError::AlreadyExists);
        }

        let layer = self
            .store
            .layer(rule.layer)
            .ok_or(EngineError::LayerNotFound)?;
        if rule.sublayer.is_nil() {
            rule.sublayer = layer.default_sublayer;
        }
        for condition in &rule.conditions {
            check_condition(layer, condition)?;
        }
        let sublayer = self.store.sublayer_entry(rule.sublayer)?;
        caller.check_lifetime(rule.persistent, sublayer, sublayer.item.persistent)?;
        if let Some(provider) = rule.provider {
            let parent = self.store.provider_entry(provider)?;
            caller.check_lifetime(rule.persistent, parent, parent.item.persistent)?;
        }
        if rule.action.is_callout() && rule.callout.is_none_or(|c| c.is_nil()) {
            return Err(EngineError::CalloutNotFound);
        }

        self.next_kernel_id += 1;
        rule.kernel_id = self.next_kernel_id;
        let key = (rule.id, rule.kernel_id);
        self.store.rules.push(Owned {
            item: rule,
            owner: caller.owner(),
        });
        Ok(key)
    }

    // ═══════════════════════════════════════════════════════════════
    // Enumeration
    // ═══════════════════════════════════════════════════════════════

    fn select(&self, query: &RuleQuery) -> EngineResult<Vec<Rule>> {
        if !query.layer.is_nil() && self.store.layer(query.layer).is_none() {
            return Err(EngineError::LayerNotFound);
        }
        let flags = query.flags;
        let mut selected: Vec<&Rule> = self
            .store
            .rules
            .iter()
            .map(|r| &r.item)
            .filter(|rule| {
                (query.layer.is_nil() || rule.layer == query.layer)
                    && query.provider.is_none_or(|p| rule.provider == Some(p))
                    && query.callout.is_none_or(|c| rule.callout == Some(c))
                    && query.provider_context.is_none()
                    && query.action_mask.selects(rule.action)
                    && (!rule.disabled || flags.contains(FilterEnumFlags::INCLUDE_DISABLED))
                    && if flags.contains(FilterEnumFlags::BOOT_TIME_ONLY) {
                        rule.boot_time
                    } else {
                        !rule.boot_time || flags.contains(FilterEnumFlags::INCLUDE_BOOT_TIME)
                    }
            })
            .collect();

        if flags.contains(FilterEnumFlags::BEST_TERMINATING_MATCH) {
            let mut best: HashMap<(LayerId, SublayerId), (u64, RuleId)> = HashMap::new();
            for rule in selected.iter().filter(|r| r.action.is_terminating()) {
                let entry = best
                    .entry((rule.layer, rule.sublayer))
                    .or_insert((rule.weight, rule.id));
                if rule.weight > entry.0 {
                    *entry = (rule.weight, rule.id);
                }
            }
            selected.retain(|rule| {
                !rule.action.is_terminating()
                    || best.get(&(rule.layer, rule.sublayer)).map(|b| b.1) == Some(rule.id)
            });
        }

        if flags.contains(FilterEnumFlags::SORTED) {
            selected.sort_by(|a, b| {
                let a_key = (self.store.sublayer_weight(a.sublayer), a.weight);
                let b_key = (self.store.sublayer_weight(b.sublayer), b.weight);
                b_key.cmp(&a_key)
            });
        }

        Ok(selected.into_iter().cloned().collect())
    }
}

fn check_condition(layer: &Layer, condition: &Match) -> EngineResult<()> {
    let field = layer
        .field(condition.field)
        .ok_or(EngineError::ConditionNotFound)?;
    match (&condition.value, condition.op) {
        (MatchValue::Range(low, high), MatchType::Range) => {
            if value_fits_field(field.data_type, low.data_type())
                && value_fits_field(field.data_type, high.data_type())
            {
                Ok(())
            } else {
                Err(EngineError::TypeMismatch)
            }
        }
        (MatchValue::Range(..), _) | (_, MatchType::Range) => Err(EngineError::TypeMismatch),
        (value, _) if value_fits_field(field.data_type, value.data_type()) => Ok(()),
        _ => Err(EngineError::TypeMismatch),
    }
}

/// Filtering engine held entirely in process memory.
#[derive(Debug)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    /// Signalled whenever the read-write transaction lock is released.
    released: Condvar,
    privileged: bool,
    page_limit: u32,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// A privileged engine containing only the built-in objects.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                store: Store::with_builtins(),
                sessions: HashMap::new(),
                cursors: HashMap::new(),
                writer: None,
                next_handle: 0,
                next_kernel_id: 0,
            }),
            released: Condvar::new(),
            privileged: true,
            page_limit: u32::MAX,
        }
    }

    /// An engine that refuses persistent sessions, like an unelevated caller.
    #[must_use]
    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    /// Caps every enumeration page at `limit` rules regardless of what the
    /// caller asks for.
    #[must_use]
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// Builds an engine preloaded with a snapshot's objects.
    pub fn from_snapshot(snapshot: EngineSnapshot) -> EngineResult<Self> {
        let engine = Self::new();
        {
            let mut state = engine.lock();
            for provider in snapshot.providers {
                state.insert_provider(provider, Caller::SYSTEM)?;
            }
            for sublayer in snapshot.sublayers {
                state.insert_sublayer(sublayer, Caller::SYSTEM)?;
            }
            for rule in snapshot.rules {
                state.insert_rule(rule, Caller::SYSTEM)?;
            }
            info!(
                providers = state.store.providers.len(),
                sublayers = state.store.sublayers.len(),
                rules = state.store.rules.len(),
                "engine restored"
            );
        }
        Ok(engine)
    }

    /// Persistent, non-built-in objects as currently committed.
    ///
    /// Changes inside a transaction that is still open are included.
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        let store = &state.store;
        EngineSnapshot {
            providers: store
                .providers
                .iter()
                .filter(|p| p.item.persistent)
                .map(|p| p.item.clone())
                .collect(),
            sublayers: store
                .sublayers
                .iter()
                .filter(|s| s.item.persistent && s.item.id != SUBLAYER_UNIVERSAL)
                .map(|s| s.item.clone())
                .collect(),
            rules: store
                .rules
                .iter()
                .filter(|r| r.item.persistent)
                .map(|r| Rule {
                    kernel_id: 0,
                    ..r.item.clone()
                })
                .collect(),
        }
    }

    /// Number of enumeration cursors currently open across all sessions.
    pub fn open_cursors(&self) -> usize {
        self.lock().cursors.len()
    }

    /// Number of session handles currently open.
    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until no other session holds the read-write lock, or `timeout`
    /// passes.
    fn wait_for_writer<'g>(
        &self,
        state: MutexGuard<'g, EngineState>,
        handle: u64,
        timeout: Duration,
    ) -> EngineResult<MutexGuard<'g, EngineState>> {
        let (state, _) = self
            .released
            .wait_timeout_while(state, timeout, |s| {
                s.writer.is_some_and(|w| w != handle)
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.writer.is_some_and(|w| w != handle) {
            return Err(EngineError::Timeout);
        }
        Ok(state)
    }

    /// Runs a mutation with write access, in the session's transaction if
    /// it has one and as an implicit transaction otherwise.
    fn mutate<T>(
        &self,
        handle: SessionHandle,
        op: impl FnOnce(&mut EngineState, Caller) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut state = self.lock();
        let session = state.session(handle)?;
        let read_only = session.transaction.as_ref().map(|t| t.read_only);
        let timeout = session.txn_wait_timeout;
        match read_only {
            Some(true) => return Err(EngineError::IncompatibleTransaction),
            Some(false) => {}
            None => state = self.wait_for_writer(state, handle.0, timeout)?,
        }
        let caller = state.caller(handle)?;
        op(&mut state, caller)
    }

    fn read<T>(
        &self,
        handle: SessionHandle,
        op: impl FnOnce(&EngineState) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let state = self.lock();
        state.session(handle)?;
        op(&state)
    }
}

impl Engine for MemoryEngine {
    fn open_session(&self, session: &SessionDescriptor<'_>) -> EngineResult<SessionHandle> {
        let dynamic = session.is_dynamic();
        if !dynamic && !self.privileged {
            return Err(EngineError::AccessDenied);
        }
        let mut state = self.lock();
        let handle = state.allocate_handle();
        state.sessions.insert(
            handle,
            SessionEntry {
                name: session.name(),
                dynamic,
                txn_wait_timeout: session.txn_wait_timeout(),
                transaction: None,
            },
        );
        debug!(handle, name = %session.name(), dynamic, "engine session opened");
        Ok(SessionHandle(handle))
    }

    fn close_session(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.lock();
        let entry = state
            .sessions
            .remove(&handle.0)
            .ok_or(EngineError::InvalidHandle)?;

        let mut released = false;
        if let Some(txn) = entry.transaction {
            warn!(
                handle = handle.0,
                name = %entry.name,
                "session closed inside a transaction, rolling back"
            );
            released = state.finish_transaction(handle.0, txn, true);
        }
        state.cursors.retain(|_, c| c.session != handle.0);
        if entry.dynamic {
            let removed = state.store.remove_owned_by(handle.0);
            // Keep another session's rollback from restoring them.
            for journal in state
                .sessions
                .values_mut()
                .filter_map(|s| s.transaction.as_mut()?.journal.as_mut())
            {
                journal.remove_owned_by(handle.0);
            }
            debug!(handle = handle.0, removed, "dynamic session objects removed");
        }
        drop(state);

        if released {
            self.released.notify_all();
        }
        Ok(())
    }

    fn begin_transaction(
        &self,
        handle: SessionHandle,
        flags: TransactionFlags,
    ) -> EngineResult<()> {
        let mut state = self.lock();
        let session = state.session(handle)?;
        if session.transaction.is_some() {
            return Err(EngineError::TransactionInProgress);
        }
        let timeout = session.txn_wait_timeout;

        let transaction = match flags {
            TransactionFlags::ReadOnly => OpenTransaction {
                read_only: true,
                journal: None,
            },
            TransactionFlags::ReadWrite => {
                state = self.wait_for_writer(state, handle.0, timeout)?;
                state.writer = Some(handle.0);
                OpenTransaction {
                    read_only: false,
                    journal: Some(state.store.clone()),
                }
            }
        };
        state.session_mut(handle)?.transaction = Some(transaction);
        Ok(())
    }

    fn commit_transaction(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.lock();
        let txn = state
            .session_mut(handle)?
            .transaction
            .take()
            .ok_or(EngineError::NoTransactionInProgress)?;
        let released = state.finish_transaction(handle.0, txn, false);
        drop(state);
        if released {
            self.released.notify_all();
        }
        Ok(())
    }

    fn abort_transaction(&self, handle: SessionHandle) -> EngineResult<()> {
        let mut state = self.lock();
        let txn = state
            .session_mut(handle)?
            .transaction
            .take()
            .ok_or(EngineError::NoTransactionInProgress)?;
        let released = state.finish_transaction(handle.0, txn, true);
        drop(state);
        if released {
            self.released.notify_all();
        }
        Ok(())
    }

    fn layers(&self, handle: SessionHandle) -> EngineResult<Vec<Layer>> {
        self.read(handle, |state| Ok(state.store.layers.clone()))
    }

    fn sublayers(
        &self,
        handle: SessionHandle,
        template: &SublayerEnumTemplate<'_>,
    ) -> EngineResult<Vec<Sublayer>> {
        let provider = template.provider();
        self.read(handle, |state| {
            Ok(state
                .store
                .sublayers
                .iter()
                .map(|s| &s.item)
                .filter(|s| provider.is_none_or(|p| s.provider == Some(p)))
                .cloned()
                .collect())
        })
    }

    fn add_sublayer(
        &self,
        handle: SessionHandle,
        sublayer: &SublayerDescriptor<'_>,
    ) -> EngineResult<()> {
        let sublayer = sublayer.to_sublayer();
        self.mutate(handle, |state, caller| state.insert_sublayer(sublayer, caller))
    }

    fn delete_sublayer(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        let id = SublayerId::from(Uuid::from(*key));
        self.mutate(handle, |state, _| {
            if id == SUBLAYER_UNIVERSAL {
                return Err(EngineError::BuiltinObject);
            }
            let index = state
                .store
                .sublayers
                .iter()
                .position(|s| s.item.id == id)
                .ok_or(EngineError::SublayerNotFound)?;
            if state.store.rules.iter().any(|r| r.item.sublayer == id) {
                return Err(EngineError::InUse);
            }
            state.store.sublayers.remove(index);
            Ok(())
        })
    }

    fn providers(&self, handle: SessionHandle) -> EngineResult<Vec<Provider>> {
        self.read(handle, |state| {
            Ok(state
                .store
                .providers
                .iter()
                .map(|p| p.item.clone())
                .collect())
        })
    }

    fn add_provider(
        &self,
        handle: SessionHandle,
        provider: &ProviderDescriptor<'_>,
    ) -> EngineResult<()> {
        let provider = provider.to_provider();
        self.mutate(handle, |state, caller| state.insert_provider(provider, caller))
    }

    fn delete_provider(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        let id = ProviderId::from(Uuid::from(*key));
        self.mutate(handle, |state, _| {
            let index = state
                .store
                .providers
                .iter()
                .position(|p| p.item.id == id)
                .ok_or(EngineError::ProviderNotFound)?;
            let referenced = state
                .store
                .sublayers
                .iter()
                .any(|s| s.item.provider == Some(id))
                || state.store.rules.iter().any(|r| r.item.provider == Some(id));
            if referenced {
                return Err(EngineError::InUse);
            }
            state.store.providers.remove(index);
            Ok(())
        })
    }

    fn add_filter(
        &self,
        handle: SessionHandle,
        filter: &FilterDescriptor<'_>,
    ) -> EngineResult<(Guid, u64)> {
        let rule = filter.to_rule()?;
        let (id, kernel_id) = self.mutate(handle, |state, caller| state.insert_rule(rule, caller))?;
        Ok((Guid::from(Uuid::from(id)), kernel_id))
    }

    fn delete_filter(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        let id = RuleId::from(Uuid::from(*key));
        self.mutate(handle, |state, _| {
            let index = state
                .store
                .rule_index(id)
                .ok_or(EngineError::FilterNotFound)?;
            state.store.rules.remove(index);
            Ok(())
        })
    }

    fn create_filter_enum(
        &self,
        handle: SessionHandle,
        template: &FilterEnumTemplate<'_>,
    ) -> EngineResult<EnumHandle> {
        let query = template.to_query()?;
        let mut state = self.lock();
        state.session(handle)?;
        let pending: VecDeque<Rule> = state.select(&query)?.into();
        let cursor = state.allocate_handle();
        debug!(cursor, matches = pending.len(), "rule cursor created");
        state.cursors.insert(
            cursor,
            Cursor {
                session: handle.0,
                pending,
            },
        );
        Ok(EnumHandle(cursor))
    }

    fn filter_enum_page(
        &self,
        handle: SessionHandle,
        cursor: EnumHandle,
        max: u32,
    ) -> EngineResult<Vec<Rule>> {
        let mut state = self.lock();
        state.session(handle)?;
        let cursor = state
            .cursors
            .get_mut(&cursor.0)
            .filter(|c| c.session == handle.0)
            .ok_or(EngineError::InvalidEnumerator)?;
        let take = max.min(self.page_limit) as usize;
        let take = take.min(cursor.pending.len());
        Ok(cursor.pending.drain(..take).collect())
    }

    fn destroy_filter_enum(&self, handle: SessionHandle, cursor: EnumHandle) -> EngineResult<()> {
        let mut state = self.lock();
        match state.cursors.get(&cursor.0) {
            Some(c) if c.session == handle.0 => {
                state.cursors.remove(&cursor.0);
                Ok(())
            }
            _ => Err(EngineError::InvalidEnumerator),
        }
    }
}
