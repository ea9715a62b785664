// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn job_with_chain() -> CompoundJob {
    let job = CompoundJob::new("chain");
    job.add_compute_action("a", 1e9, 1, 0).unwrap();
    job.add_compute_action("b", 1e9, 1, 0).unwrap();
    job.add_compute_action("c", 1e9, 1, 0).unwrap();
    job.add_dependency("a", "b").unwrap();
    job.add_dependency("b", "c").unwrap();
    job
}

#[test]
fn edges_are_consistent_both_ways() {
    let job = job_with_chain();
    let a = job.action("a").unwrap();
    let b = job.action("b").unwrap();
    assert!(a.children.contains("b"));
    assert!(b.parents.contains("a"));
}

#[test]
fn cycles_are_rejected() {
    let job = job_with_chain();
    let err = job.add_dependency("c", "a").unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
    // Self-edges too.
    let err = job.add_dependency("a", "a").unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn duplicate_action_names_are_rejected() {
    let job = CompoundJob::new("dup");
    job.add_sleep_action("s", Duration::from_secs(1)).unwrap();
    let err = job.add_sleep_action("s", Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn unknown_dependency_endpoint_is_rejected() {
    let job = CompoundJob::new("j");
    job.add_sleep_action("s", Duration::from_secs(1)).unwrap();
    let err = job.add_dependency("s", "ghost").unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn readiness_follows_parent_completion() {
    let job = job_with_chain();
    job.mark_submitted().unwrap();

    job.refresh_ready();
    assert_eq!(job.ready_actions(), vec!["a"]);
    assert_eq!(job.action_state("b"), Some(ActionState::NotReady));

    job.record_start("a", "h", "h", 1, 0, SimTime::ZERO);
    job.record_completion("a", SimTime::from_secs(1));
    job.refresh_ready();
    assert_eq!(job.ready_actions(), vec!["b"]);
}

#[test]
fn submission_freezes_the_dag() {
    let job = job_with_chain();
    job.mark_submitted().unwrap();

    let err = job.add_sleep_action("late", Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
    let err = job.add_dependency("a", "c").unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
    let err = job.mark_submitted().unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn empty_job_cannot_be_submitted() {
    let job = CompoundJob::new("empty");
    let err = job.mark_submitted().unwrap_err();
    assert!(matches!(err, FailureCause::InvalidArgument { .. }));
}

#[test]
fn state_derivation() {
    let job = job_with_chain();
    assert_eq!(job.state(), JobState::NotSubmitted);
    job.mark_submitted().unwrap();
    assert_eq!(job.state(), JobState::Pending);

    for name in ["a", "b", "c"] {
        job.record_start(name, "h", "h", 1, 0, SimTime::ZERO);
        job.record_completion(name, SimTime::from_secs(1));
    }
    assert_eq!(job.state(), JobState::Completed);
}

#[test]
fn failure_settles_the_dag() {
    let job = job_with_chain();
    job.mark_submitted().unwrap();

    job.record_start("a", "h", "h", 1, 0, SimTime::ZERO);
    job.record_failure(
        "a",
        FailureCause::file_not_found("f"),
        SimTime::from_secs(1),
    );

    // b and c can never become ready.
    assert!(job.is_settled());
    assert_eq!(job.state(), JobState::Failed);
    let (name, cause) = job.first_failure().unwrap();
    assert_eq!(name, "a");
    assert!(matches!(cause, FailureCause::FileNotFound { .. }));
}

#[test]
fn independent_actions_keep_running_after_a_failure() {
    let job = CompoundJob::new("wide");
    job.add_sleep_action("ok", Duration::from_secs(1)).unwrap();
    job.add_sleep_action("bad", Duration::from_secs(1)).unwrap();
    job.mark_submitted().unwrap();
    job.refresh_ready();

    job.record_start("bad", "h", "h", 1, 0, SimTime::ZERO);
    job.record_failure("bad", FailureCause::internal("x"), SimTime::from_secs(1));

    assert!(!job.is_settled(), "ok is still runnable");
    assert_eq!(job.state(), JobState::Pending);

    job.record_start("ok", "h", "h", 1, 0, SimTime::ZERO);
    job.record_completion("ok", SimTime::from_secs(2));
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(
        job.state_with_tolerance(true),
        JobState::PartiallyCompleted
    );
}

#[test]
fn kill_remaining_closes_everything() {
    let job = job_with_chain();
    job.mark_submitted().unwrap();
    job.refresh_ready();
    job.record_start("a", "h", "h", 1, 0, SimTime::ZERO);

    job.kill_remaining(SimTime::from_secs(2));
    assert_eq!(job.action_state("a"), Some(ActionState::Killed));
    assert_eq!(job.action_state("c"), Some(ActionState::Killed));
    assert!(job.is_settled());
}
