//! End-to-end dispatch scenarios against scripted collaborators.
//!
//! Every test drives the submitter through the deterministic doubles in
//! `flux_dispatch::test_utils`: the executor and clock are pumped by hand,
//! the resolver completes when told to, and transport replies fire when
//! the test delivers them.

use flux_dispatch::test_utils::{
    ManualClock, ManualExecutor, RecordingTracker, ScriptedClient, ScriptedClientPool,
    ScriptedResolver, TrackerEvent,
};
use flux_dispatch::{
    ActorTaskSubmitter, DeathCause, DispatchConfig, QueueingWarningHook, TaskErrorKind,
    TransportError,
};
use flux_types::{ActorId, NodeId, TaskId, TaskSpec, WorkerAddress, WorkerId};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

struct Harness {
    submitter: ActorTaskSubmitter,
    resolver: Arc<ScriptedResolver>,
    tracker: Arc<RecordingTracker>,
    pool: Arc<ScriptedClientPool>,
    executor: Arc<ManualExecutor>,
}

impl Harness {
    fn new(config: DispatchConfig) -> Self {
        Self::with_warning_hook(config, None)
    }

    fn with_warning_hook(config: DispatchConfig, hook: Option<QueueingWarningHook>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let clock = ManualClock::new(1_000);
        let executor = ManualExecutor::new(clock.clone());
        let resolver = ScriptedResolver::new();
        let tracker = RecordingTracker::new();
        let pool = ScriptedClientPool::new();
        let submitter = ActorTaskSubmitter::new(
            resolver.clone(),
            tracker.clone(),
            pool.clone(),
            executor.clone(),
            clock.clone(),
            config,
            hook,
        );
        Self {
            submitter,
            resolver,
            tracker,
            pool,
            executor,
        }
    }

    /// Build a spec the tracker already knows about, as it would after a
    /// real submission request.
    fn spec(&self, actor_id: ActorId, counter: u64) -> TaskSpec {
        let spec = TaskSpec::new(TaskId::new(), actor_id, counter);
        self.tracker.register_spec(&spec);
        spec
    }

    /// Submit and pump the executor so dependency resolution gets issued.
    fn submit(&self, spec: &TaskSpec) {
        self.submitter.submit_task(spec.clone());
        self.executor.run_until_idle();
    }

    fn client(&self, addr: &WorkerAddress) -> Arc<ScriptedClient> {
        self.pool
            .client_at(addr)
            .expect("no client was opened for this address")
    }
}

fn addr(port: u16) -> WorkerAddress {
    WorkerAddress::new(
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port,
        WorkerId::new(),
        NodeId::new(),
    )
}

#[test]
fn test_happy_path_preserves_submission_order() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);
    assert!(h.submitter.is_actor_alive(actor));

    let t1 = h.spec(actor, 0);
    let t2 = h.spec(actor, 1);
    let t3 = h.spec(actor, 2);
    h.submit(&t1);
    h.submit(&t2);
    h.submit(&t3);
    assert_eq!(h.submitter.num_pending_tasks(actor), 3);

    // Dependencies resolve out of caller order: T2 first.
    let client = h.client(&a1);
    assert!(h.resolver.resolve(t2.task_id()));
    assert!(
        client.pushes().is_empty(),
        "nothing may be sent while the head is unresolved"
    );
    assert!(h.resolver.resolve(t1.task_id()));
    assert!(h.resolver.resolve(t3.task_id()));

    let counters: Vec<u64> = client.pushes().iter().map(|p| p.actor_counter).collect();
    assert_eq!(counters, vec![0, 1, 2]);
    assert!(client
        .pushes()
        .iter()
        .all(|p| !p.skip_queue && !p.skip_execution));

    for spec in [&t1, &t2, &t3] {
        assert!(client.reply_ok(spec.task_id()));
    }
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);
    for spec in [&t1, &t2, &t3] {
        assert_eq!(h.tracker.terminal_events(spec.task_id()).len(), 1);
    }
}

#[test]
fn test_restart_replays_skip_acks_before_fresh_tasks() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    let a2 = addr(7002);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    let t2 = h.spec(actor, 1);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    h.submit(&t2);
    assert!(h.resolver.resolve(t2.task_id()));
    let client1 = h.client(&a1);
    assert_eq!(client1.pushes().len(), 2);

    // T2 completes out of order; T1's reply never arrives.
    assert!(client1.reply_ok(t2.task_id()));
    h.tracker.grant_retry(t1.task_id());
    h.submitter.disconnect_actor(actor, 1, false, None);

    // The old in-flight reply observed an I/O failure and was retried.
    assert!(h.tracker.events().iter().any(|event| matches!(
        event,
        TrackerEvent::FailedOrRetried { task_id, retried: true, .. }
            if *task_id == t1.task_id()
    )));

    h.submitter.connect_actor(actor, a2.clone(), 1);
    let client2 = h.client(&a2);
    let acks = client2.pushes();
    assert_eq!(acks.len(), 1, "reconnect replays the completed task");
    assert_eq!(acks[0].actor_counter, 1);
    assert!(acks[0].skip_execution);
    assert!(acks[0].skip_queue);

    // A late reply on the old connection is fenced off.
    assert!(client1.reply_ok(t1.task_id()));
    assert!(h.tracker.terminal_events(t1.task_id()).is_empty());

    // The tracker resubmits the retry under the same counter; it goes out
    // as a fresh task on the new incarnation.
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    let pushes = client2.pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].actor_counter, 0);
    assert!(!pushes[1].skip_execution);
    assert!(!pushes[1].skip_queue);

    assert!(client2.reply_ok(t1.task_id()));
    assert!(client2.reply_ok(t2.task_id()));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
    assert_eq!(h.tracker.terminal_events(t2.task_id()).len(), 1);
}

#[test]
fn test_transport_failure_parks_until_death_info_arrives() {
    let config = DispatchConfig {
        wait_for_death_info_grace_ms: 1_000,
        ..DispatchConfig::default()
    };
    let h = Harness::new(config);
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    let client = h.client(&a1);
    assert!(client.reply_error(t1.task_id(), TransportError::Io("connection reset".into())));

    // Parked, not failed: the cause of death is still unknown.
    assert!(h.tracker.terminal_events(t1.task_id()).is_empty());
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);

    // Death arrives inside the window with an OOM cause.
    h.executor.advance(500);
    h.submitter.check_timeout_tasks();
    assert!(h.tracker.terminal_events(t1.task_id()).is_empty());
    h.submitter.disconnect_actor(
        actor,
        0,
        true,
        Some(DeathCause::OutOfMemory {
            fail_immediately: true,
        }),
    );
    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::Failed {
            kind: TaskErrorKind::OutOfMemory,
            ..
        }
    ));

    // The sweeper never produces a second failure.
    h.executor.advance(1_000);
    h.submitter.check_timeout_tasks();
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
}

#[test]
fn test_grace_window_expiry_fails_with_actor_died() {
    let config = DispatchConfig {
        wait_for_death_info_grace_ms: 1_000,
        ..DispatchConfig::default()
    };
    let h = Harness::new(config);
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    h.client(&a1)
        .reply_error(t1.task_id(), TransportError::Io("broken pipe".into()));

    h.executor.advance(999);
    h.submitter.check_timeout_tasks();
    assert!(h.tracker.terminal_events(t1.task_id()).is_empty());

    h.executor.advance(2);
    h.submitter.check_timeout_tasks();
    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::Failed {
            kind: TaskErrorKind::ActorDied,
            ..
        }
    ));

    // Idempotent: a later sweep finds nothing.
    h.submitter.check_timeout_tasks();
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
}

#[test]
fn test_submit_to_dead_actor_fails_with_recorded_cause() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    h.submitter.disconnect_actor(
        actor,
        0,
        true,
        Some(DeathCause::OutOfMemory {
            fail_immediately: true,
        }),
    );

    let t7 = h.spec(actor, 0);
    h.submit(&t7);

    assert!(h.tracker.was_canceled(t7.task_id()));
    let terminal = h.tracker.terminal_events(t7.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::FailedOrRetried {
            kind: TaskErrorKind::OutOfMemory,
            fail_immediately: true,
            retried: false,
            ..
        }
    ));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);
}

#[test]
fn test_cancel_queued_task_before_resolution() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.has_pending(t1.task_id()));
    assert_eq!(h.submitter.num_pending_tasks(actor), 1);

    // Steal the callback first to model a resolution already in flight.
    let late_resolution = h.resolver.take_pending(t1.task_id()).unwrap();

    h.submitter.cancel_task(t1.clone(), false);
    assert!(h.tracker.was_canceled(t1.task_id()));
    assert!(h.resolver.canceled_ids().contains(&t1.task_id()));
    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::FailedOrRetried {
            kind: TaskErrorKind::TaskCancelled,
            retried: false,
            ..
        }
    ));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);

    // The late resolution finds the slot canceled and does nothing.
    late_resolution(Ok(()));
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
    assert!(!h.submitter.is_actor_alive(actor));
}

#[test]
fn test_cancel_sent_task_retries_until_finished() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    let a2 = addr(7002);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    assert_eq!(h.client(&a1).pushes().len(), 1);

    // The incarnation fails before T1's reply arrives.
    h.submitter.disconnect_actor(actor, 1, false, None);

    // No client: the cancel is rescheduled for one second later.
    h.submitter.cancel_task(t1.clone(), false);
    assert_eq!(h.executor.pending_timers(), 1);

    h.submitter.connect_actor(actor, a2.clone(), 1);
    h.executor.advance(1_000);
    let client2 = h.client(&a2);
    assert_eq!(client2.cancels().len(), 1);

    // The executor could not act yet; retry every two seconds.
    assert_eq!(client2.reply_cancel(false), Some(t1.task_id()));
    assert_eq!(h.executor.pending_timers(), 1);
    h.executor.advance(2_000);
    assert_eq!(client2.cancels().len(), 2);

    // Once the tracker forgets the task the loop stops.
    h.tracker.mark_finished(t1.task_id());
    assert_eq!(client2.reply_cancel(false), Some(t1.task_id()));
    assert_eq!(h.executor.pending_timers(), 0);
}

#[test]
fn test_stale_notifications_dropped_and_dead_is_absorbing() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    let a2 = addr(7002);

    h.submitter.connect_actor(actor, a1.clone(), 2);
    assert!(h.submitter.is_actor_alive(actor));

    // A restart notice for an older incarnation changes nothing.
    h.submitter.disconnect_actor(actor, 1, false, None);
    assert!(h.submitter.is_actor_alive(actor));

    h.submitter.disconnect_actor(actor, 3, false, None);
    assert!(!h.submitter.is_actor_alive(actor));

    // A connect for a superseded incarnation is dropped too.
    h.submitter.connect_actor(actor, a2.clone(), 2);
    assert!(!h.submitter.is_actor_alive(actor));

    h.submitter
        .disconnect_actor(actor, 3, true, Some(DeathCause::ActorDied { preempted: false }));

    // DEAD absorbs everything that follows.
    h.submitter.connect_actor(actor, a2.clone(), 10);
    assert!(!h.submitter.is_actor_alive(actor));
    assert!(h.submitter.check_actor_exists(actor));

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::FailedOrRetried {
            kind: TaskErrorKind::ActorDied,
            ..
        }
    ));
}

#[test]
fn test_reconnect_to_same_endpoint_is_noop() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    let client = h.client(&a1);
    assert_eq!(client.outstanding_replies(), 1);

    // Same endpoint under a new worker id: dropped, in-flight undisturbed.
    let mut same_endpoint = a1.clone();
    same_endpoint.worker_id = WorkerId::new();
    h.submitter.connect_actor(actor, same_endpoint, 1);
    assert_eq!(client.outstanding_replies(), 1);

    assert!(client.reply_ok(t1.task_id()));
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
}

#[test]
fn test_kill_requests_stage_and_escalate_until_connected() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);

    h.submitter.kill_actor(actor, false, false);
    h.submitter.kill_actor(actor, true, false);
    // Not an escalation: force_kill is not raised, so no_restart is ignored.
    h.submitter.kill_actor(actor, false, true);

    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);
    let kills = h.client(&a1).kills();
    assert_eq!(kills.len(), 1, "one kill per staged request");
    assert_eq!(kills[0].intended_actor_id, actor);
    assert!(kills[0].force_kill);
    assert!(!kills[0].no_restart);
}

#[test]
fn test_kill_flushes_immediately_when_connected() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    h.submitter.kill_actor(actor, true, true);
    let kills = h.client(&a1).kills();
    assert_eq!(kills.len(), 1);
    assert!(kills[0].force_kill);
    assert!(kills[0].no_restart);
}

#[test]
fn test_restarting_with_fail_fast_fails_submissions() {
    let config = DispatchConfig {
        wait_for_death_info_grace_ms: 0,
        ..DispatchConfig::default()
    };
    let h = Harness::new(config);
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, true);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);
    h.submitter.disconnect_actor(actor, 1, false, None);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    // The synthesized reply runs through the executor.
    h.executor.run_until_idle();

    let events = h.tracker.events();
    assert!(events.iter().any(|event| matches!(
        event,
        TrackerEvent::FailedOrRetried {
            task_id,
            kind: TaskErrorKind::ActorUnavailable,
            retried: false,
            ..
        } if *task_id == t1.task_id()
    )));
    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::Failed {
            kind: TaskErrorKind::ActorDied,
            ..
        }
    ));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);
}

#[test]
fn test_out_of_order_actor_sends_in_resolution_order() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, true, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    let t2 = h.spec(actor, 1);
    h.submit(&t1);
    h.submit(&t2);

    assert!(h.resolver.resolve(t2.task_id()));
    assert!(h.resolver.resolve(t1.task_id()));

    let client = h.client(&a1);
    let counters: Vec<u64> = client.pushes().iter().map(|p| p.actor_counter).collect();
    assert_eq!(counters, vec![1, 0], "resolution order, not caller order");
    assert!(client.pushes().iter().all(|p| p.skip_queue));
}

#[test]
fn test_canceled_head_does_not_block_successors() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    let t2 = h.spec(actor, 1);
    h.submit(&t1);
    h.submit(&t2);

    h.submitter.cancel_task(t1.clone(), false);
    assert!(h.resolver.resolve(t2.task_id()));

    let client = h.client(&a1);
    let counters: Vec<u64> = client.pushes().iter().map(|p| p.actor_counter).collect();
    assert_eq!(counters, vec![1]);
    assert_eq!(h.submitter.num_pending_tasks(actor), 1);
}

#[test]
fn test_excess_queueing_warning_doubles_threshold() {
    let warnings: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    let hook: QueueingWarningHook = Box::new(move |_actor, count| {
        sink.lock().unwrap().push(count);
    });
    let config = DispatchConfig {
        queueing_warn_threshold: 1,
        ..DispatchConfig::default()
    };
    let h = Harness::with_warning_hook(config, Some(hook));
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 0, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    for counter in 0..5 {
        let spec = h.spec(actor, counter);
        h.submit(&spec);
        assert!(h.resolver.resolve(spec.task_id()));
    }

    // Fired at one and two in-flight replies, then the threshold is four.
    assert_eq!(*warnings.lock().unwrap(), vec![1, 2, 4]);
}

#[test]
fn test_registration_is_first_wins_and_admission_queries_work() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    assert!(!h.submitter.check_actor_exists(actor));
    h.submitter.add_actor_queue_if_absent(actor, 2, false, false);
    assert!(h.submitter.check_actor_exists(actor));

    let t1 = h.spec(actor, 0);
    let t2 = h.spec(actor, 1);
    h.submit(&t1);
    h.submit(&t2);
    assert_eq!(h.submitter.num_pending_tasks(actor), 2);
    assert!(h.submitter.pending_tasks_full(actor));

    // Re-registration with a larger limit is a no-op.
    h.submitter.add_actor_queue_if_absent(actor, 64, false, false);
    assert!(h.submitter.pending_tasks_full(actor));

    let debug = h.submitter.debug_string(actor);
    assert!(debug.contains("state=PENDING"));
    assert!(debug.contains("queued=2"));
}

#[test]
#[should_panic(expected = "duplicate actor counter")]
fn test_duplicate_counter_is_a_programmer_error() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let t1 = h.spec(actor, 0);
    let t1_again = h.spec(actor, 0);
    h.submit(&t1);
    h.submit(&t1_again);
}

#[test]
#[should_panic(expected = "actor not registered")]
fn test_submit_without_registration_is_a_programmer_error() {
    let h = Harness::new(DispatchConfig::default());
    let spec = TaskSpec::new(TaskId::new(), ActorId::new(), 0);
    h.submitter.submit_task(spec);
}

#[test]
fn test_dependency_resolution_failure_routes_to_tracker() {
    let h = Harness::new(DispatchConfig::default());
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.fail(t1.task_id(), "lost object"));

    let terminal = h.tracker.terminal_events(t1.task_id());
    assert_eq!(terminal.len(), 1);
    assert!(matches!(
        terminal[0],
        TrackerEvent::FailedOrRetried {
            kind: TaskErrorKind::DependencyResolutionFailed,
            ..
        }
    ));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);
    assert!(h.client(&a1).pushes().is_empty());
}

#[test]
fn test_dead_disconnect_fails_queued_and_parked_tasks_once() {
    let config = DispatchConfig {
        wait_for_death_info_grace_ms: 5_000,
        ..DispatchConfig::default()
    };
    let h = Harness::new(config);
    let actor = ActorId::new();
    h.submitter.add_actor_queue_if_absent(actor, 8, false, false);
    let a1 = addr(7001);
    h.submitter.connect_actor(actor, a1.clone(), 0);

    // T1 is sent and hits a transport error, landing in the grace buffer.
    let t1 = h.spec(actor, 0);
    h.submit(&t1);
    assert!(h.resolver.resolve(t1.task_id()));
    h.client(&a1)
        .reply_error(t1.task_id(), TransportError::Io("connection reset".into()));

    // T2 is still queued, waiting on dependencies.
    let t2 = h.spec(actor, 1);
    h.submit(&t2);
    assert_eq!(h.submitter.num_pending_tasks(actor), 1);

    h.submitter
        .disconnect_actor(actor, 0, true, Some(DeathCause::ActorDied { preempted: true }));

    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
    assert_eq!(h.tracker.terminal_events(t2.task_id()).len(), 1);
    assert!(h.tracker.was_canceled(t2.task_id()));
    assert!(h.resolver.canceled_ids().contains(&t2.task_id()));
    assert_eq!(h.submitter.num_pending_tasks(actor), 0);

    // A later sweep finds nothing left to fail.
    h.executor.advance(10_000);
    h.submitter.check_timeout_tasks();
    assert_eq!(h.tracker.terminal_events(t1.task_id()).len(), 1);
}
