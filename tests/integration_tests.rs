//! Integration tests for wfkit
//!
//! These tests drive the public API end to end against the in-process
//! engine: session lifecycle, transaction contention between sessions,
//! paged enumeration and engine state persistence.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use wfkit::core::enumerate::PAGE_SIZE;
use wfkit::core::layers::{LAYER_ALE_AUTH_CONNECT_V4, LAYER_ALE_AUTH_RECV_ACCEPT_V4};
use wfkit::core::state;
use wfkit::core::transaction::TransactionState;
use wfkit::core::types::{
    ActionFlag, LayerId, Provider, ProviderId, RuleId, Sublayer, SublayerId, TransactionFlags,
};
use wfkit::{
    Action, EngineError, Error, FilterEnumFlags, FilterEnumType, MemoryEngine, Options, Rule,
    Session,
};

const PROVIDER_G: ProviderId = ProviderId::from_u128(0x3c1f_2a77_9e4b_4d5c_8a10_5f7e_b2c4_d901);

fn open(engine: &Arc<MemoryEngine>, options: Options) -> wfkit::Result<Session> {
    Session::open(engine.clone(), options)
}

fn permit_rule(name: &str, layer: LayerId, weight: u64) -> Rule {
    Rule {
        id: RuleId::new_v4(),
        name: name.to_string(),
        layer,
        weight,
        action: Action::Permit,
        ..Rule::default()
    }
}

fn with_transaction(timeout: Duration) -> Options {
    Options {
        name: "integration".to_string(),
        start_transaction: true,
        transaction_start_timeout: timeout,
        ..Options::default()
    }
}

#[test]
fn test_provider_and_rule_end_to_end() {
    let engine = Arc::new(MemoryEngine::new());
    let options = Options {
        dynamic: true,
        ..with_transaction(Duration::ZERO)
    };
    let mut session = open(&engine, options).unwrap();
    assert!(session.is_dynamic());

    session
        .add_provider(&Provider {
            id: PROVIDER_G,
            name: "Example provider".to_string(),
            description: "integration".to_string(),
            ..Provider::default()
        })
        .unwrap();

    let mut rule = Rule {
        provider: Some(PROVIDER_G),
        ..permit_rule("e2e", LAYER_ALE_AUTH_CONNECT_V4, 0x4242)
    };
    session.add_rule(&mut rule).unwrap();
    // A rule from another provider must not show up.
    session
        .add_rule(&mut permit_rule("other", LAYER_ALE_AUTH_CONNECT_V4, 1))
        .unwrap();
    session.commit_transaction().unwrap();

    let rules = session
        .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
        .with_provider(PROVIDER_G)
        .with_action_mask(ActionFlag::IGNORE)
        .with_flags(FilterEnumFlags::SORTED)
        .execute()
        .unwrap();

    assert_eq!(rules.len(), 1);
    let found = &rules[0];
    assert_eq!(found.id, rule.id);
    assert_eq!(found.kernel_id, rule.kernel_id);
    assert_eq!(found.action, Action::Permit);
    assert_eq!(found.weight, 0x4242);
    assert_eq!(found.provider, Some(PROVIDER_G));

    session.close().unwrap();
    assert_eq!(engine.open_sessions(), 0);

    // Everything the dynamic session added went with it.
    let observer = open(&engine, Options::default()).unwrap();
    assert!(observer.rules().unwrap().is_empty());
    assert!(observer.providers().unwrap().is_empty());
}

#[test]
fn test_close_aborts_and_later_calls_fail() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = open(&engine, with_transaction(Duration::from_secs(15))).unwrap();
    assert_eq!(
        session.transaction_status().state,
        TransactionState::BeganTransaction
    );

    session.close().unwrap();
    assert!(session.is_closed());
    assert_eq!(
        session.transaction_status().state,
        TransactionState::AbortedTransaction
    );

    assert!(matches!(
        session.commit_transaction(),
        Err(Error::Engine(EngineError::NilPointer))
    ));
    assert!(matches!(
        session.abort_transaction(),
        Err(Error::Engine(EngineError::NilPointer))
    ));
    let status = session.transaction_status();
    assert_eq!(status.state, TransactionState::AbortedTransaction);
    assert_eq!(status.error, Some(EngineError::NilPointer));

    // Closing twice is harmless.
    session.close().unwrap();
}

#[test]
fn test_blocked_transaction_start() {
    let engine = Arc::new(MemoryEngine::new());
    let _holder = open(&engine, with_transaction(Duration::ZERO)).unwrap();

    // Opening without a transaction is never blocked.
    let mut idle = open(
        &engine,
        Options {
            transaction_start_timeout: Duration::from_millis(1),
            ..Options::default()
        },
    )
    .unwrap();
    assert!(matches!(
        idle.begin_transaction(TransactionFlags::ReadWrite),
        Err(Error::Engine(EngineError::Timeout))
    ));
    assert_eq!(
        idle.transaction_status().state,
        TransactionState::NoTransaction
    );

    let blocked = open(&engine, with_transaction(Duration::from_millis(1)));
    match blocked {
        Err(Error::TransactionStart { source }) => assert_eq!(source, EngineError::Timeout),
        other => panic!("expected a transaction start failure, got {:?}", other.map(|_| ())),
    }
    // The blocked session's handle was released.
    assert_eq!(engine.open_sessions(), 2);

    // Read-only transactions do not wait for the writer.
    idle.begin_transaction(TransactionFlags::ReadOnly).unwrap();
    idle.commit_transaction().unwrap();
}

#[test]
fn test_waiting_session_starts_after_release() {
    let engine = Arc::new(MemoryEngine::new());
    let mut holder = open(&engine, with_transaction(Duration::ZERO)).unwrap();

    std::thread::scope(|scope| {
        let waiter = scope.spawn(|| open(&engine, with_transaction(Duration::from_secs(10))));
        std::thread::sleep(Duration::from_millis(50));
        holder.commit_transaction().unwrap();

        let session = waiter.join().unwrap().unwrap();
        assert_eq!(
            session.transaction_status().state,
            TransactionState::BeganTransaction
        );
    });
}

#[test]
fn test_begin_commit_makes_changes_visible() {
    let engine = Arc::new(MemoryEngine::new());
    let mut writer = open(&engine, with_transaction(Duration::ZERO)).unwrap();
    let mut reader = open(&engine, Options::default()).unwrap();

    let mut rule = permit_rule("visible", LAYER_ALE_AUTH_CONNECT_V4, 10);
    writer.add_rule(&mut rule).unwrap();
    writer.commit_transaction().unwrap();
    assert_eq!(
        writer.transaction_status().state,
        TransactionState::CommittedTransaction
    );

    let rules = reader.rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule.id);

    reader.close().unwrap();
    writer.close().unwrap();
    // Committed work survives both sessions.
    let check = open(&engine, Options::default()).unwrap();
    assert_eq!(check.rules().unwrap().len(), 1);
}

#[test]
fn test_begin_abort_discards_changes() {
    let engine = Arc::new(MemoryEngine::new());
    let mut session = open(&engine, Options::default()).unwrap();

    session.begin_transaction(TransactionFlags::ReadWrite).unwrap();
    session
        .add_provider(&Provider {
            id: PROVIDER_G,
            name: "discarded".to_string(),
            ..Provider::default()
        })
        .unwrap();
    session
        .add_rule(&mut permit_rule("discarded", LAYER_ALE_AUTH_CONNECT_V4, 1))
        .unwrap();
    session.abort_transaction().unwrap();

    assert!(session.rules().unwrap().is_empty());
    assert!(session.providers().unwrap().is_empty());
    assert!(matches!(
        session.begin_transaction(TransactionFlags::ReadWrite),
        Err(Error::Engine(EngineError::NilPointer))
    ));
}

#[test]
fn test_multi_page_sorted_enumeration() {
    let count = u64::from(PAGE_SIZE) * 2 + 50;
    let engine = Arc::new(MemoryEngine::new().with_page_limit(7));
    let mut session = open(&engine, with_transaction(Duration::ZERO)).unwrap();

    let high = SublayerId::new_v4();
    session
        .add_sublayer(&Sublayer {
            id: high,
            name: "high".to_string(),
            weight: 0xF000,
            ..Sublayer::default()
        })
        .unwrap();

    for weight in 0..count {
        session
            .add_rule(&mut permit_rule("paged", LAYER_ALE_AUTH_CONNECT_V4, weight))
            .unwrap();
    }
    let mut top = Rule {
        sublayer: high,
        ..permit_rule("top", LAYER_ALE_AUTH_CONNECT_V4, 0)
    };
    session.add_rule(&mut top).unwrap();
    session.commit_transaction().unwrap();

    let rules = session
        .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_CONNECT_V4)
        .with_flags(FilterEnumFlags::SORTED)
        .execute()
        .unwrap();

    assert_eq!(rules.len() as u64, count + 1);
    // The heavier sublayer sorts first regardless of rule weight.
    assert_eq!(rules[0].id, top.id);
    let weights: Vec<u64> = rules[1..].iter().map(|r| r.weight).collect();
    assert!(weights.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(engine.open_cursors(), 0);
}

#[test]
fn test_empty_enumeration() {
    let engine = Arc::new(MemoryEngine::new());
    let session = open(&engine, Options::default()).unwrap();

    let rules = session
        .enumerate_rules(FilterEnumType::Overlapping, LAYER_ALE_AUTH_RECV_ACCEPT_V4)
        .execute()
        .unwrap();
    assert!(rules.is_empty());
    assert_eq!(engine.open_cursors(), 0);
}

#[test]
fn test_dynamic_session_cleanup() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let mut dynamic = open(
            &engine,
            Options {
                dynamic: true,
                ..Options::default()
            },
        )
        .unwrap();
        dynamic
            .add_rule(&mut permit_rule("temporary", LAYER_ALE_AUTH_CONNECT_V4, 3))
            .unwrap();

        let mut persistent = Rule {
            persistent: true,
            ..permit_rule("refused", LAYER_ALE_AUTH_CONNECT_V4, 4)
        };
        assert!(matches!(
            dynamic.add_rule(&mut persistent),
            Err(Error::Engine(EngineError::DynamicSessionInProgress))
        ));

        let observer = open(&engine, Options::default()).unwrap();
        assert_eq!(observer.rules().unwrap().len(), 1);
    }

    let observer = open(&engine, Options::default()).unwrap();
    assert!(observer.rules().unwrap().is_empty());
}

#[test]
fn test_unprivileged_engine_requires_dynamic_sessions() {
    let engine = Arc::new(MemoryEngine::new().unprivileged());

    let denied = open(&engine, Options::default());
    assert!(matches!(
        denied,
        Err(Error::Engine(EngineError::AccessDenied))
    ));

    let session = open(
        &engine,
        Options {
            dynamic: true,
            ..Options::default()
        },
    )
    .unwrap();
    assert!(session.is_dynamic());
    assert!(!session.layers().unwrap().is_empty());
}

#[test]
fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");

    let mut rule = Rule {
        persistent: true,
        provider: Some(PROVIDER_G),
        ..permit_rule("kept", LAYER_ALE_AUTH_CONNECT_V4, 77)
    };
    {
        let engine = Arc::new(MemoryEngine::from_snapshot(state::load(&path).unwrap()).unwrap());
        let mut session = open(&engine, with_transaction(Duration::ZERO)).unwrap();
        session
            .add_provider(&Provider {
                id: PROVIDER_G,
                name: "kept".to_string(),
                persistent: true,
                ..Provider::default()
            })
            .unwrap();
        session.add_rule(&mut rule).unwrap();
        session
            .add_rule(&mut permit_rule("dropped", LAYER_ALE_AUTH_CONNECT_V4, 1))
            .unwrap();
        session.commit_transaction().unwrap();
        session.close().unwrap();

        state::save(&path, &engine.snapshot()).unwrap();
    }

    let engine = Arc::new(MemoryEngine::from_snapshot(state::load(&path).unwrap()).unwrap());
    let session = open(&engine, Options::default()).unwrap();

    let providers = session.providers().unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id, PROVIDER_G);

    let rules = session.rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule.id);
    assert_eq!(rules[0].weight, 77);
    assert_ne!(rules[0].kernel_id, 0);
}
