#[cfg(test)]
mod tests_impl {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    use crate::core::engine::Engine;
    use crate::core::error::{EngineError, Error};
    use crate::core::layers::{
        LAYER_ALE_AUTH_CONNECT_V4, LAYER_ALE_AUTH_CONNECT_V6, SUBLAYER_UNIVERSAL,
    };
    use crate::core::memory::MemoryEngine;
    use crate::core::session::{Options, Session};
    use crate::core::test_helpers::{
        FailingPagesEngine, create_full_test_rule, create_test_provider, create_test_rule,
        open_test_session,
    };
    use crate::core::transaction::TransactionState;
    use crate::core::types::{
        ActionFlag, FilterEnumFlags, FilterEnumType, LayerId, RuleId, Sublayer, SublayerId,
        TransactionFlags,
    };

    fn options(start_transaction: bool) -> Options {
        Options {
            name: "core test".to_string(),
            start_transaction,
            transaction_start_timeout: Duration::from_millis(20),
            ..Options::default()
        }
    }

    #[test]
    fn test_session_transaction_lifecycle() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = Session::open(engine.clone(), options(false)).unwrap();
        assert_eq!(
            session.transaction_status().state,
            TransactionState::NoTransaction
        );

        session.begin_transaction(TransactionFlags::ReadWrite).unwrap();
        let mut rule = create_test_rule("committed", 1);
        session.add_rule(&mut rule).unwrap();
        session.commit_transaction().unwrap();
        assert_eq!(
            session.transaction_status().state,
            TransactionState::CommittedTransaction
        );

        // Committing doesn't stop plain mutations on the handle.
        session.delete_rule(rule.id).unwrap();
        assert!(session.rules().unwrap().is_empty());

        session.close().unwrap();
        assert_eq!(
            session.transaction_status().state,
            TransactionState::CommittedTransaction
        );
        assert_eq!(engine.open_sessions(), 0);
    }

    #[test]
    fn test_abort_discards_changes() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = Session::open(engine, options(true)).unwrap();
        session.add_rule(&mut create_test_rule("discarded", 1)).unwrap();
        assert_eq!(session.rules().unwrap().len(), 1);
        session.abort_transaction().unwrap();
        assert!(session.rules().unwrap().is_empty());
        assert_eq!(
            session.transaction_status().state,
            TransactionState::AbortedTransaction
        );
    }

    #[test]
    fn test_status_records_rejected_commit() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = Session::open(engine, options(false)).unwrap();
        let _ = session.commit_transaction();
        let status = session.transaction_status();
        assert_eq!(status.state, TransactionState::NoTransaction);
        assert_eq!(status.error, Some(EngineError::NoTransactionInProgress));
    }

    #[test]
    fn test_closed_session_reports_nil_pointer() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = Session::open(engine, options(false)).unwrap();
        session.close().unwrap();
        session.close().unwrap();

        let err = session
            .begin_transaction(TransactionFlags::ReadWrite)
            .unwrap_err();
        assert_eq!(err.engine_code(), Some(EngineError::NilPointer));
        assert_eq!(
            session.transaction_status().error,
            Some(EngineError::NilPointer)
        );
        assert_eq!(
            session.layers().unwrap_err().engine_code(),
            Some(EngineError::NilPointer)
        );
        assert!(session.is_closed());
    }

    #[test]
    fn test_drop_aborts_and_releases_lock() {
        let engine = Arc::new(MemoryEngine::new());
        {
            let mut session = Session::open(engine.clone(), options(true)).unwrap();
            session.add_rule(&mut create_test_rule("dropped", 1)).unwrap();
        }
        assert_eq!(engine.open_sessions(), 0);

        let session = Session::open(engine, options(true)).unwrap();
        assert_eq!(
            session.transaction_status().state,
            TransactionState::BeganTransaction
        );
        assert!(session.rules().unwrap().is_empty());
    }

    #[test]
    fn test_failed_transaction_start_releases_handle() {
        let engine = Arc::new(MemoryEngine::new());
        let _holder = Session::open(engine.clone(), options(true)).unwrap();

        let err = Session::open(engine.clone(), options(true)).unwrap_err();
        assert!(matches!(
            err,
            Error::TransactionStart {
                source: EngineError::Timeout
            }
        ));
        assert_eq!(engine.open_sessions(), 1);
    }

    #[test]
    fn test_add_rule_writes_back_ids() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = open_test_session(&engine, true);
        let mut rule = create_full_test_rule("https", 10, 443, Some("10.0.0.0/8"));
        rule.id = RuleId::NIL;
        session.add_rule(&mut rule).unwrap();
        assert!(!rule.id.is_nil());
        assert_ne!(rule.kernel_id, 0);

        let listed = session.rules().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, rule.id);
        assert_eq!(listed[0].conditions, rule.conditions);
        assert_eq!(listed[0].sublayer, SUBLAYER_UNIVERSAL);
    }

    #[test]
    fn test_oversized_description_is_rejected_before_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = open_test_session(&engine, true);
        let mut rule = create_test_rule("long", 1);
        rule.description = "d".repeat(5000);
        let err = session.add_rule(&mut rule).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(session.rules().unwrap().is_empty());
    }

    #[test]
    fn test_provider_and_sublayer_crud() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = open_test_session(&engine, true);
        let provider = create_test_provider("crud");
        session.add_provider(&provider).unwrap();

        let sublayer = Sublayer {
            id: SublayerId::new_v4(),
            name: "crud sublayer".to_string(),
            provider: Some(provider.id),
            weight: 10,
            ..Sublayer::default()
        };
        session.add_sublayer(&sublayer).unwrap();

        assert_eq!(session.providers().unwrap(), vec![provider.clone()]);
        assert_eq!(session.sublayers(Some(provider.id)).unwrap(), vec![sublayer.clone()]);
        // The universal sublayer plus ours.
        assert_eq!(session.sublayers(None).unwrap().len(), 2);

        let err = session.delete_provider(provider.id).unwrap_err();
        assert_eq!(err.engine_code(), Some(EngineError::InUse));
        session.delete_sublayer(sublayer.id).unwrap();
        session.delete_provider(provider.id).unwrap();
        assert!(session.providers().unwrap().is_empty());
    }

    #[test]
    fn test_enumerator_branches_are_independent() {
        let engine = Arc::new(MemoryEngine::new());
        let session = open_test_session(&engine, true);
        let base = session
            .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
            .with_flags(FilterEnumFlags::SORTED);
        let v6 = base.with_layer(LAYER_ALE_AUTH_CONNECT_V6);
        let masked = base.with_action_mask(ActionFlag::CALLOUT);

        assert_eq!(base.query().layer, LAYER_ALE_AUTH_CONNECT_V4);
        assert_eq!(base.query().action_mask, ActionFlag::IGNORE);
        assert_eq!(v6.query().layer, LAYER_ALE_AUTH_CONNECT_V6);
        assert_eq!(masked.query().action_mask, ActionFlag::CALLOUT);
        assert_eq!(masked.query().flags, FilterEnumFlags::SORTED);
    }

    #[test]
    fn test_enumerate_empty_releases_cursor() {
        let engine = Arc::new(MemoryEngine::new());
        let session = open_test_session(&engine, true);
        let rules = session
            .enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
            .execute()
            .unwrap();
        assert!(rules.is_empty());
        assert_eq!(engine.open_cursors(), 0);
    }

    #[test]
    fn test_enumerate_filters_by_action_mask() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = open_test_session(&engine, true);
        session.add_rule(&mut create_test_rule("permit", 1)).unwrap();

        let callouts = session
            .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
            .with_action_mask(ActionFlag::CALLOUT)
            .execute()
            .unwrap();
        assert!(callouts.is_empty());

        let terminating = session
            .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
            .with_action_mask(ActionFlag::TERMINATING)
            .execute()
            .unwrap();
        assert_eq!(terminating.len(), 1);
    }

    #[test]
    fn test_enumerate_sorted_across_pages() {
        let engine = Arc::new(MemoryEngine::new().with_page_limit(3));
        let mut session = open_test_session(&engine, true);
        for weight in [5u64, 12, 1, 9, 3, 11, 7, 2] {
            session
                .add_rule(&mut create_test_rule(&format!("w{weight}"), weight))
                .unwrap();
        }

        let weights: Vec<u64> = session
            .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
            .with_flags(FilterEnumFlags::SORTED)
            .execute()
            .unwrap()
            .iter()
            .map(|r| r.weight)
            .collect();
        assert_eq!(weights, vec![12, 11, 9, 7, 5, 3, 2, 1]);
        assert_eq!(engine.open_cursors(), 0);
    }

    #[test]
    fn test_page_error_discards_results_and_releases_cursor() {
        let engine = Arc::new(FailingPagesEngine::new(
            MemoryEngine::new().with_page_limit(2),
            1,
        ));
        let dyn_engine: Arc<dyn Engine> = engine.clone();
        let mut session = Session::open(
            dyn_engine,
            Options {
                dynamic: true,
                ..Options::default()
            },
        )
        .unwrap();
        for i in 0..5 {
            session
                .add_rule(&mut create_test_rule(&format!("r{i}"), i))
                .unwrap();
        }

        let err = session
            .enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
            .execute()
            .unwrap_err();
        assert_eq!(err.engine_code(), Some(FailingPagesEngine::INJECTED));
        assert_eq!(engine.pages.load(Ordering::SeqCst), 2);
        assert_eq!(engine.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.inner.open_cursors(), 0);
    }

    #[test]
    fn test_concurrent_enumerations_share_session() {
        let engine = Arc::new(MemoryEngine::new().with_page_limit(4));
        let mut session = open_test_session(&engine, true);
        for i in 0..40 {
            session
                .add_rule(&mut create_test_rule(&format!("r{i}"), i))
                .unwrap();
        }

        let session = &session;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        session
                            .enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
                            .with_flags(FilterEnumFlags::SORTED)
                            .execute()
                            .unwrap()
                    })
                })
                .collect();
            for handle in handles {
                let rules = handle.join().unwrap();
                assert_eq!(rules.len(), 40);
                assert_eq!(rules[0].weight, 39);
            }
        });
        assert_eq!(engine.open_cursors(), 0);
    }

    #[test]
    fn test_enumerate_by_provider() {
        let engine = Arc::new(MemoryEngine::new());
        let mut session = open_test_session(&engine, true);
        let provider = create_test_provider("mine");
        session.add_provider(&provider).unwrap();

        let mut mine = create_test_rule("mine", 1);
        mine.provider = Some(provider.id);
        session.add_rule(&mut mine).unwrap();
        session.add_rule(&mut create_test_rule("other", 2)).unwrap();

        let rules = session
            .enumerate_rules(FilterEnumType::Overlapping, LayerId::NIL)
            .with_provider(provider.id)
            .execute()
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, mine.id);
    }
}
