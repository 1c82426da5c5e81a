/*!
 * Registry Tests
 * Registration, ordering, removal and trap bridging against a recording trap
 */

use crate::common::{registry, registry_with, CallLog, TrapCall};
use anyhow::bail;
use posix_signal_manager::{
    handler_fn, HandlerState, PosixSignal, RegistryConfig, RegistryError, SignalId, TrapDisposition,
    TrapError,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn recorder(log: &CallLog, label: &str) -> impl Fn(&[Value]) -> anyhow::Result<()> + Send + Sync {
    let log = log.clone();
    let label = label.to_string();
    move |_| {
        log.push(label.clone());
        Ok(())
    }
}

#[test]
fn test_interrupt_scenario() {
    let (registry, trap) = registry();
    let log = CallLog::new();

    assert_eq!(registry.add_at(PosixSignal::Interrupt, 0, recorder(&log, "A")).unwrap(), 0);
    assert_eq!(registry.add(PosixSignal::Interrupt, recorder(&log, "B")).unwrap(), 1);

    registry.dispatch(PosixSignal::Interrupt);
    assert_eq!(log.take(), vec!["A", "B"]);

    assert_eq!(registry.remove_handler(PosixSignal::Interrupt, Some(0)).unwrap(), 0);
    registry.dispatch(PosixSignal::Interrupt);
    assert_eq!(log.take(), vec!["B"]);

    // Only the first handler touched the OS slot
    assert_eq!(trap.installs(PosixSignal::Interrupt), 1);
    assert_eq!(trap.restores(PosixSignal::Interrupt), 0);
}

#[test]
fn test_untrappable_signals_rejected() {
    let (registry, trap) = registry();

    for signal in [PosixSignal::Kill, PosixSignal::Stop] {
        let err = registry.add(signal, |_| Ok(())).unwrap_err();
        assert_eq!(err, RegistryError::UnsupportedSignal(signal.into()));
        assert!(!registry.handler_exists(signal, None));
    }

    for raw in [0, -1, 4096] {
        let err = registry.add(raw, |_| Ok(())).unwrap_err();
        assert_eq!(err, RegistryError::UnsupportedSignal(SignalId::from_raw(raw)));
        assert!(!registry.handler_exists(raw, None));
    }

    assert!(trap.calls().is_empty());
}

#[test]
fn test_dispatch_follows_ordinal_not_insertion() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    registry.add_at(PosixSignal::User1, 5, recorder(&log, "five")).unwrap();
    registry.add_at(PosixSignal::User1, 1, recorder(&log, "one")).unwrap();
    registry.add_at(PosixSignal::User1, 3, recorder(&log, "three")).unwrap();

    registry.dispatch(PosixSignal::User1);
    assert_eq!(log.take(), vec!["one", "three", "five"]);

    let ordinals: Vec<i64> = registry
        .get_handlers(PosixSignal::User1)
        .iter()
        .map(|e| e.ordinal())
        .collect();
    assert_eq!(ordinals, vec![1, 3, 5]);
}

#[test]
fn test_auto_ordinals_increase() {
    let (registry, _trap) = registry();

    let ordinals: Vec<i64> = (0..5)
        .map(|_| registry.add(PosixSignal::Hangup, |_| Ok(())).unwrap())
        .collect();
    assert_eq!(ordinals, vec![0, 1, 2, 3, 4]);

    // Auto ordinals continue after the highest explicit one
    registry.add_at(PosixSignal::Hangup, 40, |_| Ok(())).unwrap();
    assert_eq!(registry.add(PosixSignal::Hangup, |_| Ok(())).unwrap(), 41);
}

#[test]
fn test_add_then_remove_restores_default() {
    let (registry, trap) = registry();

    registry.add(PosixSignal::Terminate, |_| Ok(())).unwrap();
    assert_eq!(trap.current(PosixSignal::Terminate), TrapDisposition::Dispatcher);

    assert_eq!(registry.remove_handler(PosixSignal::Terminate, None).unwrap(), 0);
    assert!(!registry.handler_exists(PosixSignal::Terminate, None));
    assert_eq!(trap.current(PosixSignal::Terminate), TrapDisposition::Default);

    let value = PosixSignal::Terminate.value();
    assert_eq!(
        trap.calls(),
        vec![TrapCall::Install(value), TrapCall::Restore(value)]
    );
}

#[test]
fn test_clear_is_idempotent() {
    let (registry, trap) = registry();

    registry.add(PosixSignal::User2, |_| Ok(())).unwrap();
    registry.add(PosixSignal::User2, |_| Ok(())).unwrap();

    registry.clear_handlers(PosixSignal::User2).unwrap();
    assert!(!registry.handler_exists(PosixSignal::User2, None));
    let after_first = (registry.registered_signals(), trap.current(PosixSignal::User2));

    registry.clear_handlers(PosixSignal::User2).unwrap();
    assert!(!registry.handler_exists(PosixSignal::User2, None));
    assert_eq!(
        (registry.registered_signals(), trap.current(PosixSignal::User2)),
        after_first
    );

    // The restore call is issued both times
    assert_eq!(trap.restores(PosixSignal::User2), 2);
}

#[test]
fn test_failing_handler_does_not_stop_siblings() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    registry.add(PosixSignal::Alarm, |_| bail!("handler failed")).unwrap();
    registry.add(PosixSignal::Alarm, |_| panic!("handler panicked")).unwrap();
    registry.add(PosixSignal::Alarm, recorder(&log, "after")).unwrap();

    let outcome = registry.dispatch(PosixSignal::Alarm);
    assert_eq!(log.take(), vec!["after"]);
    assert_eq!(outcome.invoked, 3);
    assert_eq!(outcome.failed, 2);

    let stats = registry.stats();
    assert_eq!(stats.handler_invocations, 3);
    assert_eq!(stats.handler_failures, 2);
}

#[test]
#[should_panic(expected = "handler panicked")]
fn test_strict_config_propagates_panics() {
    let (registry, _trap) = registry_with(RegistryConfig::strict());
    registry.add(PosixSignal::Alarm, |_| panic!("handler panicked")).unwrap();
    registry.dispatch(PosixSignal::Alarm);
}

#[test]
fn test_empty_dispatch_is_noop() {
    let (registry, trap) = registry();

    let outcome = registry.dispatch(PosixSignal::User2);
    assert!(outcome.is_noop());
    assert_eq!(outcome.signal, PosixSignal::User2);
    assert!(trap.calls().is_empty());
    assert_eq!(registry.stats().dispatches, 0);

    // Unregistered raw numbers are ignored too
    assert!(registry.dispatch(4096).is_noop());
}

#[test]
fn test_install_failure_rolls_back() {
    let (registry, trap) = registry();
    trap.fail_install(PosixSignal::User1, true);

    let err = registry.add(PosixSignal::User1, |_| Ok(())).unwrap_err();
    assert_eq!(
        err,
        RegistryError::TrapInstallation {
            signal: PosixSignal::User1.into(),
            source: TrapError::Rejected {
                signal: PosixSignal::User1.into(),
                reason: "install refused".to_string(),
            },
        }
    );
    assert!(!registry.handler_exists(PosixSignal::User1, None));
    assert_eq!(registry.handler_count(PosixSignal::User1), 0);
    assert_eq!(registry.stats().trap_failures, 1);
    assert_eq!(registry.stats().handlers_registered, 0);

    trap.fail_install(PosixSignal::User1, false);
    assert_eq!(registry.add(PosixSignal::User1, |_| Ok(())).unwrap(), 0);
}

#[test]
fn test_restore_failure_marks_divergence() {
    let (registry, trap) = registry();

    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    trap.fail_restore(PosixSignal::User1, true);

    let err = registry.remove_handler(PosixSignal::User1, None).unwrap_err();
    assert!(matches!(err, RegistryError::DispositionDiverged { .. }));
    assert_eq!(err.signal(), Some(PosixSignal::User1.into()));

    // The removal stands even though the OS slot still points at the dispatcher
    assert!(!registry.handler_exists(PosixSignal::User1, None));
    assert_eq!(trap.current(PosixSignal::User1), TrapDisposition::Dispatcher);
    assert_eq!(registry.diverged_signals(), vec![SignalId::from(PosixSignal::User1)]);

    // Re-registering finds the dispatcher already installed
    trap.fail_restore(PosixSignal::User1, false);
    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    assert!(registry.diverged_signals().is_empty());
    assert_eq!(trap.installs(PosixSignal::User1), 1);
}

#[test]
fn test_redundant_install_check_can_be_disabled() {
    let config = RegistryConfig::default().with_skip_redundant_install(false);
    let (registry, trap) = registry_with(config);
    trap.set_current(PosixSignal::User1, TrapDisposition::Dispatcher);

    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    assert_eq!(trap.installs(PosixSignal::User1), 1);
}

#[test]
fn test_remove_errors() {
    let (registry, _trap) = registry();

    assert_eq!(
        registry.remove_handler(PosixSignal::User1, None).unwrap_err(),
        RegistryError::NoHandlers(PosixSignal::User1.into())
    );

    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    assert_eq!(
        registry.remove_handler(PosixSignal::User1, Some(7)).unwrap_err(),
        RegistryError::UnknownOrdinal {
            signal: PosixSignal::User1.into(),
            ordinal: 7,
        }
    );
    assert_eq!(registry.handler_count(PosixSignal::User1), 1);

    assert_eq!(
        registry.remove_handler(PosixSignal::Kill, None).unwrap_err(),
        RegistryError::UnsupportedSignal(PosixSignal::Kill.into())
    );
}

#[test]
fn test_remove_without_ordinal_takes_highest() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    registry.add_at(PosixSignal::Quit, 2, recorder(&log, "two")).unwrap();
    registry.add_at(PosixSignal::Quit, 9, recorder(&log, "nine")).unwrap();

    assert_eq!(registry.remove_handler(PosixSignal::Quit, None).unwrap(), 9);
    registry.dispatch(PosixSignal::Quit);
    assert_eq!(log.take(), vec!["two"]);

    // The freed ordinal is handed out again
    assert_eq!(registry.add(PosixSignal::Quit, |_| Ok(())).unwrap(), 3);
}

#[test]
fn test_explicit_ordinal_collision_replaces_entry() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    registry.add_at(PosixSignal::User2, 0, recorder(&log, "old")).unwrap();
    let old = registry.get_handlers(PosixSignal::User2);

    registry.add_at(PosixSignal::User2, 0, recorder(&log, "new")).unwrap();
    assert_eq!(registry.handler_count(PosixSignal::User2), 1);
    assert_eq!(old[0].state(), HandlerState::Revoked);

    registry.dispatch(PosixSignal::User2);
    assert_eq!(log.take(), vec!["new"]);
    assert_eq!(registry.stats().handlers_registered, 1);
}

#[test]
fn test_bound_args_passed_to_handler() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    let sink = log.clone();
    registry
        .add_with_args(
            PosixSignal::Hangup,
            vec![json!("reload"), json!(3)],
            move |args| {
                sink.push(format!("{}:{}", args[0], args[1]));
                Ok(())
            },
        )
        .unwrap();

    registry.dispatch(PosixSignal::Hangup);
    assert_eq!(log.take(), vec![r#""reload":3"#]);

    let entries = registry.get_handlers(PosixSignal::Hangup);
    assert_eq!(entries[0].bound_args(), &[json!("reload"), json!(3)]);
}

#[test]
fn test_replace_handlers_keeps_trap_installed() {
    let (registry, trap) = registry();
    let log = CallLog::new();

    for label in ["a", "b", "c"] {
        registry.add(PosixSignal::Terminate, recorder(&log, label)).unwrap();
    }
    let old = registry.get_handlers(PosixSignal::Terminate);

    let ordinal = registry
        .replace_handlers(PosixSignal::Terminate, handler_fn(recorder(&log, "only")), vec![])
        .unwrap();
    assert_eq!(ordinal, 0);
    assert_eq!(registry.handler_count(PosixSignal::Terminate), 1);
    assert!(old.iter().all(|e| e.state() == HandlerState::Revoked));

    registry.dispatch(PosixSignal::Terminate);
    assert_eq!(log.take(), vec!["only"]);

    assert_eq!(trap.installs(PosixSignal::Terminate), 1);
    assert_eq!(trap.restores(PosixSignal::Terminate), 0);
}

#[test]
fn test_replace_handlers_on_empty_signal_installs() {
    let (registry, trap) = registry();

    registry
        .replace_handlers(PosixSignal::Continue, handler_fn(|_| Ok(())), vec![])
        .unwrap();
    assert!(registry.handler_exists(PosixSignal::Continue, Some(0)));
    assert_eq!(trap.installs(PosixSignal::Continue), 1);
}

#[test]
fn test_revoke_and_prune() {
    let (registry, trap) = registry();
    let log = CallLog::new();

    for label in ["zero", "one", "two"] {
        registry.add(PosixSignal::User1, recorder(&log, label)).unwrap();
    }

    registry.revoke_handler(PosixSignal::User1, 1).unwrap();
    assert!(!registry.handler_exists(PosixSignal::User1, Some(1)));
    assert!(registry.handler_exists(PosixSignal::User1, None));
    assert_eq!(registry.handler_count(PosixSignal::User1), 3);

    let outcome = registry.dispatch(PosixSignal::User1);
    assert_eq!(log.take(), vec!["zero", "two"]);
    assert_eq!((outcome.invoked, outcome.skipped), (2, 1));

    // Revoked entries cannot be revoked or removed by ordinal again
    assert!(registry.revoke_handler(PosixSignal::User1, 1).is_err());
    assert!(registry.remove_handler(PosixSignal::User1, Some(1)).is_err());

    assert_eq!(registry.prune_revoked(PosixSignal::User1).unwrap(), 1);
    assert_eq!(registry.handler_count(PosixSignal::User1), 2);
    assert_eq!(registry.prune_revoked(PosixSignal::User1).unwrap(), 0);

    registry.revoke_handler(PosixSignal::User1, 0).unwrap();
    registry.revoke_handler(PosixSignal::User1, 2).unwrap();
    assert_eq!(registry.prune_all_revoked().unwrap(), 2);
    assert!(!registry.handler_exists(PosixSignal::User1, None));
    assert_eq!(trap.restores(PosixSignal::User1), 1);
}

#[test]
fn test_clear_all_handlers() {
    let (registry, trap) = registry();
    let signals = [PosixSignal::Hangup, PosixSignal::User1, PosixSignal::User2];

    for signal in signals {
        registry.add(signal, |_| Ok(())).unwrap();
    }
    assert_eq!(
        registry.registered_signals(),
        signals.iter().map(|&s| SignalId::from(s)).collect::<Vec<_>>()
    );

    registry.clear_all_handlers().unwrap();
    assert!(registry.registered_signals().is_empty());
    for signal in signals {
        assert_eq!(trap.restores(signal), 1);
        assert_eq!(trap.current(signal), TrapDisposition::Default);
    }
    assert_eq!(registry.stats().handlers_removed, 3);
}

#[test]
fn test_clear_all_reports_first_failure() {
    let (registry, trap) = registry();

    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    registry.add(PosixSignal::User2, |_| Ok(())).unwrap();
    trap.fail_restore(PosixSignal::User1, true);

    let err = registry.clear_all_handlers().unwrap_err();
    assert_eq!(err.signal(), Some(PosixSignal::User1.into()));

    // Every signal was still attempted
    assert!(registry.registered_signals().is_empty());
    assert_eq!(trap.restores(PosixSignal::User2), 1);
    assert_eq!(registry.diverged_signals(), vec![SignalId::from(PosixSignal::User1)]);
}

#[test]
fn test_handlers_can_mutate_registry_during_dispatch() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    let inner = registry.clone();
    let sink = log.clone();
    registry
        .add(PosixSignal::User1, move |_| {
            let sink = sink.clone();
            inner.add(PosixSignal::User1, move |_| {
                sink.push("late");
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();

    // The handler added mid-dispatch runs from the next dispatch on
    let outcome = registry.dispatch(PosixSignal::User1);
    assert_eq!(outcome.invoked, 1);
    assert!(log.take().is_empty());
    assert_eq!(registry.handler_count(PosixSignal::User1), 2);

    registry.dispatch(PosixSignal::User1);
    assert_eq!(log.take(), vec!["late"]);
}

#[test]
fn test_handler_can_remove_itself() {
    let (registry, trap) = registry();
    let log = CallLog::new();

    let inner = registry.clone();
    let sink = log.clone();
    registry
        .add(PosixSignal::Alarm, move |_| {
            sink.push("once");
            inner.remove_handler(PosixSignal::Alarm, None)?;
            Ok(())
        })
        .unwrap();

    registry.dispatch(PosixSignal::Alarm);
    registry.dispatch(PosixSignal::Alarm);
    assert_eq!(log.take(), vec!["once"]);
    assert_eq!(trap.current(PosixSignal::Alarm), TrapDisposition::Default);
}

#[test]
fn test_raw_numbers_and_names_are_interchangeable() {
    let (registry, _trap) = registry();

    registry.add(PosixSignal::User1.value(), |_| Ok(())).unwrap();
    assert!(registry.handler_exists(PosixSignal::User1, Some(0)));

    let named: PosixSignal = "usr1".parse().unwrap();
    assert_eq!(registry.handler_count(named), 1);
    assert_eq!(
        PosixSignal::from_name("SIGBOGUS").unwrap_err(),
        RegistryError::UnknownSignalName("SIGBOGUS".to_string())
    );
}

#[test]
fn test_stats_track_lifecycle() {
    let (registry, _trap) = registry();

    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    registry.add(PosixSignal::User1, |_| Ok(())).unwrap();
    registry.dispatch(PosixSignal::User1);
    registry.clear_handlers(PosixSignal::User1).unwrap();

    let stats = registry.stats();
    assert_eq!(stats.handlers_registered, 0);
    assert_eq!(stats.handlers_removed, 2);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.handler_invocations, 2);
    assert_eq!(stats.traps_installed, 1);
    assert_eq!(stats.traps_restored, 1);
}

#[test]
fn test_auto_ordinal_exhausted_above_max() {
    let (registry, _trap) = registry();
    let log = CallLog::new();

    registry
        .add_at(PosixSignal::User1, i64::MAX, recorder(&log, "top"))
        .unwrap();

    assert_eq!(
        registry.add(PosixSignal::User1, recorder(&log, "auto")).unwrap_err(),
        RegistryError::OrdinalExhausted(PosixSignal::User1.into())
    );

    // The entry at the maximum ordinal is untouched
    let entries = registry.get_handlers(PosixSignal::User1);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].state(), HandlerState::Active);
    assert_eq!(registry.stats().handlers_registered, 1);

    registry.dispatch(PosixSignal::User1);
    assert_eq!(log.take(), vec!["top"]);

    // Explicit ordinals below the maximum are still accepted
    assert_eq!(registry.add_at(PosixSignal::User1, 5, |_| Ok(())).unwrap(), 5);
}
