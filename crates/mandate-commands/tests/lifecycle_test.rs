//! Command lifecycle tests across the state machine, queue selection,
//! and sequence rules.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use uuid::Uuid;

use mandate_commands::{
    Command, CommandSequence, CommandSpec, CommandStatus, ReportDisposition, ReportOutcome,
    select_next,
};

/// Helper to create a queued command assigned to a device.
fn make_command(seq: u64, ttl: u32) -> Command {
    let now = Utc::now();
    Command::new(
        CommandSpec::new("DeviceInformation").with_device("udid-1").with_ttl(ttl),
        seq,
        now,
    )
}

#[test]
fn test_ttl_is_non_increasing_over_lifetime() {
    let now = Utc::now();
    let mut cmd = make_command(1, 3);
    let mut observed = vec![cmd.ttl];

    loop {
        cmd.mark_sent(now).unwrap();
        let disposition = cmd.apply_report(ReportOutcome::NotNow, now).unwrap();
        observed.push(cmd.ttl);
        if disposition == ReportDisposition::Expired {
            break;
        }
    }

    assert_eq!(observed, vec![3, 2, 1, 0]);
    assert_eq!(cmd.status, CommandStatus::Expired);
}

#[test]
fn test_expired_never_returns_to_queued() {
    let now = Utc::now();
    let mut cmd = make_command(1, 1);
    cmd.mark_sent(now).unwrap();
    cmd.apply_report(ReportOutcome::NotNow, now).unwrap();
    assert_eq!(cmd.status, CommandStatus::Expired);

    assert!(cmd.mark_sent(now).is_err());
    assert!(cmd.apply_report(ReportOutcome::NotNow, now).is_err());
    assert!(cmd.cancel().is_err());
    assert_eq!(cmd.status, CommandStatus::Expired);
}

#[test]
fn test_double_report_is_rejected() {
    // A device must not be able to report twice for one delivery and
    // decrement ttl twice.
    let now = Utc::now();
    let mut cmd = make_command(1, 5);
    cmd.mark_sent(now).unwrap();
    cmd.apply_report(ReportOutcome::NotNow, now).unwrap();
    assert_eq!(cmd.ttl, 4);

    assert!(cmd.apply_report(ReportOutcome::NotNow, now).is_err());
    assert_eq!(cmd.ttl, 4);
}

#[test]
fn test_sequence_walkthrough_with_failure() {
    // Sequence [A, B, C]: A acknowledged, B errors after delivery, C is
    // cancelled; B keeps its Error state.
    let now = Utc::now();
    let mut a = make_command(1, 5);
    let mut b = make_command(2, 5);
    let mut c = make_command(3, 5);
    let seq = CommandSequence::new(7, vec![a.uuid, b.uuid, c.uuid]);
    for (cmd, id) in [(&mut a, 7u64), (&mut b, 7), (&mut c, 7)] {
        cmd.sequence_id = Some(id);
    }

    let statuses = |a: &Command, b: &Command, c: &Command| -> HashMap<Uuid, CommandStatus> {
        [(a.uuid, a.status), (b.uuid, b.status), (c.uuid, c.status)]
            .into_iter()
            .collect()
    };

    // Only A is eligible at first.
    let snapshot = statuses(&a, &b, &c);
    assert!(seq.is_eligible(&a.uuid, |u| snapshot.get(u).copied()));
    assert!(!seq.is_eligible(&b.uuid, |u| snapshot.get(u).copied()));

    a.mark_sent(now).unwrap();
    a.apply_report(ReportOutcome::Acknowledged, now).unwrap();

    let snapshot = statuses(&a, &b, &c);
    assert!(seq.is_eligible(&b.uuid, |u| snapshot.get(u).copied()));
    assert!(!seq.is_eligible(&c.uuid, |u| snapshot.get(u).copied()));

    b.mark_sent(now).unwrap();
    let disposition = b.apply_report(ReportOutcome::Error, now).unwrap();
    assert!(disposition.is_terminal_failure());

    let snapshot = statuses(&a, &b, &c);
    let to_cancel = seq.cancellable_members(|u| snapshot.get(u).copied());
    assert_eq!(to_cancel, vec![c.uuid]);

    c.cancel().unwrap();
    assert_eq!(b.status, CommandStatus::Error);
    assert_eq!(c.status, CommandStatus::Cancelled);

    // Nothing in the sequence is selectable anymore.
    let commands = vec![a, b, c];
    let snapshot: HashMap<Uuid, CommandStatus> =
        commands.iter().map(|c| (c.uuid, c.status)).collect();
    let next = select_next(&commands, now, |cmd| {
        seq.is_eligible(&cmd.uuid, |u| snapshot.get(u).copied())
    });
    assert!(next.is_none());
}

#[test]
fn test_selection_honors_sequence_order_not_enqueue_interleaving() {
    // A non-sequence command enqueued between two sequence members is
    // still selected by FIFO, while the blocked member waits.
    let now = Utc::now();
    let a = make_command(1, 5);
    let loose = make_command(2, 5);
    let b = make_command(3, 5);
    let seq = CommandSequence::new(1, vec![a.uuid, b.uuid]);

    let commands = vec![a, loose, b];
    let snapshot: HashMap<Uuid, CommandStatus> =
        commands.iter().map(|c| (c.uuid, c.status)).collect();

    let next = select_next(&commands, now, |cmd| {
        seq.position_of(&cmd.uuid).is_none()
            || seq.is_eligible(&cmd.uuid, |u| snapshot.get(u).copied())
    })
    .unwrap();
    assert_eq!(next.seq, 1);

    // With A gone from the queue but not acknowledged, the loose
    // command is next; B stays blocked.
    let mut commands = commands;
    commands[0].mark_sent(now).unwrap();
    let snapshot: HashMap<Uuid, CommandStatus> =
        commands.iter().map(|c| (c.uuid, c.status)).collect();
    let next = select_next(&commands, now, |cmd| {
        seq.position_of(&cmd.uuid).is_none()
            || seq.is_eligible(&cmd.uuid, |u| snapshot.get(u).copied())
    })
    .unwrap();
    assert_eq!(next.seq, 2);
}

#[test]
fn test_deferred_command_selected_once_due() {
    let now = Utc::now();
    let mut deferred = make_command(1, 5);
    deferred.after = Some(now + Duration::hours(1));
    let commands = vec![deferred];

    assert!(select_next(&commands, now, |_| true).is_none());
    assert!(select_next(&commands, now + Duration::hours(2), |_| true).is_some());
}
