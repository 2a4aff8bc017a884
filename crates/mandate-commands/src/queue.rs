//! Queue selection.
//!
//! Given the commands assigned to a device, picks the one to hand out
//! next: `Queued`, past its `after` time, sequence-eligible, smallest
//! creation-order sequence number. Strict FIFO by enqueue order; ties
//! are impossible because sequence numbers are unique.
//!
//! These predicates are pure. The store applies them inside the write
//! transaction that also marks the winner `Sent`, which is what makes
//! concurrent check-ins safe.

use chrono::{DateTime, Utc};

use crate::command::{Command, CommandStatus};

/// Check the device-independent delivery predicates: queued, and not
/// scheduled for the future.
pub fn is_deliverable(command: &Command, now: DateTime<Utc>) -> bool {
    command.status == CommandStatus::Queued && command.after.map_or(true, |after| after <= now)
}

/// Select the next command to deliver from a device's candidates.
///
/// `eligible` is the sequence-ordering constraint; non-sequence
/// commands are always eligible.
pub fn select_next<'a, I, F>(candidates: I, now: DateTime<Utc>, mut eligible: F) -> Option<&'a Command>
where
    I: IntoIterator<Item = &'a Command>,
    F: FnMut(&Command) -> bool,
{
    candidates
        .into_iter()
        .filter(|c| is_deliverable(c, now))
        .filter(|c| eligible(c))
        .min_by_key(|c| c.seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSpec;
    use chrono::Duration;

    fn queued(seq: u64, now: DateTime<Utc>) -> Command {
        Command::new(CommandSpec::new("DeviceInformation").with_device("d1"), seq, now)
    }

    #[test]
    fn test_fifo_by_sequence_number() {
        let now = Utc::now();
        let commands = vec![queued(3, now), queued(1, now), queued(2, now)];
        let next = select_next(&commands, now, |_| true).unwrap();
        assert_eq!(next.seq, 1);
    }

    #[test]
    fn test_after_in_future_is_skipped() {
        let now = Utc::now();
        let mut deferred = queued(1, now);
        deferred.after = Some(now + Duration::hours(1));
        let ready = queued(2, now);

        let commands = vec![deferred, ready];
        let next = select_next(&commands, now, |_| true).unwrap();
        assert_eq!(next.seq, 2);

        // Two hours later the deferred command wins on FIFO order.
        let later = now + Duration::hours(2);
        let next = select_next(&commands, later, |_| true).unwrap();
        assert_eq!(next.seq, 1);
    }

    #[test]
    fn test_never_returns_future_after() {
        let now = Utc::now();
        let mut deferred = queued(1, now);
        deferred.after = Some(now + Duration::hours(1));
        let commands = vec![deferred];
        assert!(select_next(&commands, now, |_| true).is_none());
    }

    #[test]
    fn test_non_queued_is_skipped() {
        let now = Utc::now();
        let mut sent = queued(1, now);
        sent.mark_sent(now).unwrap();
        let commands = vec![sent, queued(2, now)];
        let next = select_next(&commands, now, |_| true).unwrap();
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn test_eligibility_filter_applies() {
        let now = Utc::now();
        let commands = vec![queued(1, now), queued(2, now)];
        let next = select_next(&commands, now, |c| c.seq != 1).unwrap();
        assert_eq!(next.seq, 2);
    }

    #[test]
    fn test_empty_candidates() {
        let now = Utc::now();
        let commands: Vec<Command> = Vec::new();
        assert!(select_next(&commands, now, |_| true).is_none());
    }
}
