//! Paged rule enumeration
//!
//! A [`RuleEnumerator`] is a copyable builder over a [`RuleQuery`]. Nothing
//! touches the engine until [`RuleEnumerator::execute`], which materialises the
//! query in a scoped arena, opens a cursor, drains it page by page and closes
//! it on every exit path.

use tracing::{debug, warn};

use crate::core::arena::Arena;
use crate::core::engine::{EnumHandle, Engine, SessionHandle};
use crate::core::error::Result;
use crate::core::native::FilterEnumTemplate;
use crate::core::session::Session;
use crate::core::types::{
    ActionFlag, CalloutId, FilterEnumFlags, FilterEnumType, LayerId, ProviderId, Rule,
};

/// Rules requested per page.
pub const PAGE_SIZE: u32 = 100;

/// Selection criteria for rule enumeration.
///
/// A nil `layer` selects rules in every layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleQuery {
    pub provider: Option<ProviderId>,
    pub layer: LayerId,
    pub enum_type: FilterEnumType,
    pub flags: FilterEnumFlags,
    pub action_mask: ActionFlag,
    /// Provider and context type a rule's provider context must match.
    pub provider_context: Option<(ProviderId, u32)>,
    pub callout: Option<CalloutId>,
}

/// Builder for one rule enumeration against a session.
///
/// Each `with_*` call returns a modified copy, so branches built from the
/// same base never affect each other:
///
/// ```no_run
/// # use wfkit::core::session::Session;
/// # use wfkit::core::types::{FilterEnumFlags, FilterEnumType, LayerId, ProviderId};
/// # fn run(session: &Session, a: ProviderId, b: ProviderId) -> wfkit::core::error::Result<()> {
/// let base = session
///     .enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
///     .with_flags(FilterEnumFlags::SORTED);
/// let mine = base.with_provider(a).execute()?;
/// let theirs = base.with_provider(b).execute()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Copy)]
pub struct RuleEnumerator<'s> {
    session: &'s Session,
    query: RuleQuery,
}

impl<'s> RuleEnumerator<'s> {
    pub(crate) fn new(session: &'s Session, enum_type: FilterEnumType, layer: LayerId) -> Self {
        Self {
            session,
            query: RuleQuery {
                enum_type,
                layer,
                ..RuleQuery::default()
            },
        }
    }

    pub fn query(&self) -> &RuleQuery {
        &self.query
    }

    #[must_use]
    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.query.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_layer(mut self, layer: LayerId) -> Self {
        self.query.layer = layer;
        self
    }

    #[must_use]
    pub fn with_type(mut self, enum_type: FilterEnumType) -> Self {
        self.query.enum_type = enum_type;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: FilterEnumFlags) -> Self {
        self.query.flags = flags;
        self
    }

    #[must_use]
    pub fn with_action_mask(mut self, mask: ActionFlag) -> Self {
        self.query.action_mask = mask;
        self
    }

    #[must_use]
    pub fn with_provider_context(mut self, provider: ProviderId, context_type: u32) -> Self {
        self.query.provider_context = Some((provider, context_type));
        self
    }

    #[must_use]
    pub fn with_callout_key(mut self, callout: CalloutId) -> Self {
        self.query.callout = Some(callout);
        self
    }

    /// Runs the enumeration to completion.
    ///
    /// An empty match set is an empty `Vec`. If any page request fails the
    /// rules gathered so far are dropped and the error is returned.
    pub fn execute(&self) -> Result<Vec<Rule>> {
        let handle = self.session.handle()?;
        let engine = self.session.engine();

        let arena = Arena::new();
        let template = FilterEnumTemplate::new_in(&arena, &self.query);
        let cursor = engine.create_filter_enum(handle, template)?;
        // Declared after the arena so the cursor is released first.
        let _cursor = CursorGuard {
            engine,
            handle,
            cursor,
        };

        let mut rules = Vec::new();
        loop {
            let page = engine.filter_enum_page(handle, cursor, PAGE_SIZE)?;
            if page.is_empty() {
                break;
            }
            debug!(page = page.len(), total = rules.len() + page.len(), "rule page");
            rules.extend(page);
        }
        debug!(
            count = rules.len(),
            flags = %self.query.flags,
            enum_type = %self.query.enum_type,
            "rule enumeration complete"
        );
        Ok(rules)
    }
}

struct CursorGuard<'e> {
    engine: &'e dyn Engine,
    handle: SessionHandle,
    cursor: EnumHandle,
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.destroy_filter_enum(self.handle, self.cursor) {
            warn!(cursor = self.cursor.0, "failed to release rule cursor: {e}");
        }
    }
}
