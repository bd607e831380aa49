//! The filtering engine boundary
//!
//! [`Engine`] is the set of calls a session makes against the platform's
//! filtering engine. Arguments are native descriptors built in an
//! [`Arena`](crate::core::arena::Arena); results come back as host values.
//! Failures are raw [`EngineError`] status codes, never rewritten.
//!
//! The in-process implementation is [`MemoryEngine`](crate::core::memory::MemoryEngine).

use std::fmt;

use crate::core::error::EngineError;
use crate::core::native::{
    FilterDescriptor, FilterEnumTemplate, Guid, ProviderDescriptor, SessionDescriptor,
    SublayerDescriptor, SublayerEnumTemplate,
};
use crate::core::types::{Layer, Provider, Rule, Sublayer, TransactionFlags};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opaque session handle issued by [`Engine::open_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Opaque rule enumeration cursor issued by [`Engine::create_filter_enum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumHandle(pub u64);

/// Calls into a filtering engine.
///
/// Implementations must be safe to call from several threads at once; each
/// session handle is used by one caller at a time.
pub trait Engine: Send + Sync {
    fn open_session(&self, session: &SessionDescriptor<'_>) -> EngineResult<SessionHandle>;

    /// Releases a handle. An explicit transaction still open on it is aborted.
    fn close_session(&self, handle: SessionHandle) -> EngineResult<()>;

    fn begin_transaction(&self, handle: SessionHandle, flags: TransactionFlags)
    -> EngineResult<()>;
    fn commit_transaction(&self, handle: SessionHandle) -> EngineResult<()>;
    fn abort_transaction(&self, handle: SessionHandle) -> EngineResult<()>;

    fn layers(&self, handle: SessionHandle) -> EngineResult<Vec<Layer>>;

    fn sublayers(
        &self,
        handle: SessionHandle,
        template: &SublayerEnumTemplate<'_>,
    ) -> EngineResult<Vec<Sublayer>>;
    fn add_sublayer(
        &self,
        handle: SessionHandle,
        sublayer: &SublayerDescriptor<'_>,
    ) -> EngineResult<()>;
    fn delete_sublayer(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()>;

    fn providers(&self, handle: SessionHandle) -> EngineResult<Vec<Provider>>;
    fn add_provider(
        &self,
        handle: SessionHandle,
        provider: &ProviderDescriptor<'_>,
    ) -> EngineResult<()>;
    fn delete_provider(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()>;

    /// Adds a rule, returning its key (assigned if the descriptor's was nil)
    /// and its runtime kernel id.
    fn add_filter(
        &self,
        handle: SessionHandle,
        filter: &FilterDescriptor<'_>,
    ) -> EngineResult<(Guid, u64)>;
    fn delete_filter(&self, handle: SessionHandle, key: &Guid) -> EngineResult<()>;

    fn create_filter_enum(
        &self,
        handle: SessionHandle,
        template: &FilterEnumTemplate<'_>,
    ) -> EngineResult<EnumHandle>;

    /// Returns up to `max` further rules; an empty page means the cursor is
    /// exhausted. The engine may return fewer than `max` before that.
    fn filter_enum_page(
        &self,
        handle: SessionHandle,
        cursor: EnumHandle,
        max: u32,
    ) -> EngineResult<Vec<Rule>>;

    fn destroy_filter_enum(&self, handle: SessionHandle, cursor: EnumHandle) -> EngineResult<()>;
}
