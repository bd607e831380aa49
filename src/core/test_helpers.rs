//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::engine::{Engine, EngineResult, EnumHandle, SessionHandle};
use crate::core::error::EngineError;
use crate::core::layers::{FIELD_IP_REMOTE_ADDRESS, FIELD_IP_REMOTE_PORT, LAYER_ALE_AUTH_CONNECT_V4};
use crate::core::memory::MemoryEngine;
use crate::core::native::{
    FilterDescriptor, FilterEnumTemplate, Guid, ProviderDescriptor, SessionDescriptor,
    SublayerDescriptor, SublayerEnumTemplate,
};
use crate::core::session::{Options, Session};
use crate::core::types::{
    Action, Layer, Match, MatchType, MatchValue, Provider, ProviderId, Rule, RuleId, Sublayer,
    TransactionFlags,
};

/// Creates a permit rule on the v4 connect layer with no conditions.
///
/// This is the canonical helper for creating test rules.
pub fn create_test_rule(name: &str, weight: u64) -> Rule {
    Rule {
        id: RuleId::new_v4(),
        name: name.to_string(),
        layer: LAYER_ALE_AUTH_CONNECT_V4,
        weight,
        action: Action::Permit,
        ..Rule::default()
    }
}

/// Creates a test rule matching a remote port and, optionally, a remote
/// network given as a CIDR string.
pub fn create_full_test_rule(name: &str, weight: u64, port: u16, remote: Option<&str>) -> Rule {
    let mut conditions = vec![Match {
        field: FIELD_IP_REMOTE_PORT,
        op: MatchType::Equal,
        value: MatchValue::U16(port),
    }];
    if let Some(net) = remote.and_then(|s| s.parse().ok()) {
        conditions.push(Match {
            field: FIELD_IP_REMOTE_ADDRESS,
            op: MatchType::Equal,
            value: MatchValue::Network(net),
        });
    }
    Rule {
        conditions,
        ..create_test_rule(name, weight)
    }
}

pub fn create_test_provider(name: &str) -> Provider {
    Provider {
        id: ProviderId::new_v4(),
        name: name.to_string(),
        description: format!("{name} (test)"),
        ..Provider::default()
    }
}

/// Opens a session on `engine` with a short transaction timeout.
pub fn open_test_session(engine: &Arc<MemoryEngine>, dynamic: bool) -> Session {
    let engine: Arc<dyn Engine> = engine.clone();
    Session::open(
        engine,
        Options {
            name: "test".to_string(),
            dynamic,
            transaction_start_timeout: Duration::from_millis(50),
            ..Options::default()
        },
    )
    .unwrap()
}

/// Wraps a [`MemoryEngine`] and fails the page request numbered
/// `fail_on_page` (counting from zero) with [`EngineError::Other`].
#[derive(Debug)]
pub struct FailingPagesEngine {
    pub inner: MemoryEngine,
    pub fail_on_page: usize,
    pub pages: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl FailingPagesEngine {
    pub const INJECTED: EngineError = EngineError::Other(0x8032_00FE);

    pub fn new(inner: MemoryEngine, fail_on_page: usize) -> Self {
        Self {
            inner,
            fail_on_page,
            pages: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }
}

impl Engine for FailingPagesEngine {
    fn open_session(&self, session: &SessionDescriptor<'_>) -> EngineResult<SessionHandle> {
        self.inner.open_session(session)
    }

    fn close_session(&self, handle: SessionHandle) -> EngineResult<()> {
        self.inner.close_session(handle)
    }

    fn begin_transaction(
        &self,
        handle: SessionHandle,
        flags: TransactionFlags,
    ) -> EngineResult<()> {
        self.inner.begin_transaction(handle, flags)
    }

    fn commit_transaction(&self, handle: SessionHandle) -> EngineResult<()> {
        self.inner.commit_transaction(handle)
    }

    fn abort_transaction(&self, handle: SessionHandle) -> EngineResult<()> {
        self.inner.abort_transaction(handle)
    }

    fn layers(&self, handle: SessionHandle) -> EngineResult<Vec<Layer>> {
        self.inner.layers(handle)
    }

    fn sublayers(
        &self,
        handle: SessionHandle,
        template: &SublayerEnumTemplate<'_>,
    ) -> EngineResult<Vec<Sublayer>> {
        self.inner.sublayers(handle, template)
    }

    fn add_sublayer(
        &self,
        handle: SessionHandle,
        sublayer: &SublayerDescriptor<'_>,
    ) -> EngineResult<()> {
        self.inner.add_sublayer(handle, sublayer)
    }

    fn delete_sublayer(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        self.inner.delete_sublayer(handle, key)
    }

    fn providers(&self, handle: SessionHandle) -> EngineResult<Vec<Provider>> {
        self.inner.providers(handle)
    }

    fn add_provider(
        &self,
        handle: SessionHandle,
        provider: &ProviderDescriptor<'_>,
    ) -> EngineResult<()> {
        self.inner.add_provider(handle, provider)
    }

    fn delete_provider(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        self.inner.delete_provider(handle, key)
    }

    fn add_filter(
        &self,
        handle: SessionHandle,
        filter: &FilterDescriptor<'_>,
    ) -> EngineResult<(Guid, u64)> {
        self.inner.add_filter(handle, filter)
    }

    fn delete_filter(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()> {
        self.inner.delete_filter(handle, key)
    }

    fn create_filter_enum(
        &self,
        handle: SessionHandle,
        template: &FilterEnumTemplate<'_>,
    ) -> EngineResult<EnumHandle> {
        self.inner.create_filter_enum(handle, template)
    }

    fn filter_enum_page(
        &self,
        handle: SessionHandle,
        cursor: EnumHandle,
        max: u32,
    ) -> EngineResult<Vec<Rule>> {
        if self.pages.fetch_add(1, Ordering::SeqCst) == self.fail_on_page {
            return Err(Self::INJECTED);
        }
        self.inner.filter_enum_page(handle, cursor, max)
    }

    fn destroy_filter_enum(&self, handle: SessionHandle, cursor: EnumHandle) -> EngineResult<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy_filter_enum(handle, cursor)
    }
}
