//! Consistency checks over an assembled snapshot.

use crate::{
    message::Message,
    snapshot::{ProcessRecord, SnapshotDocument},
    ProcessId,
};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// More than one process was inside the critical section.
    MultipleHolders(Vec<ProcessId>),
    /// Nobody wanted the critical section, yet a process still owed replies.
    IdleButOwing(ProcessId),
    /// Nobody wanted the critical section, yet messages were in transit towards a process.
    IdleButInTransit(ProcessId),
    /// A process collected replies without holding or wanting the critical section.
    StrayReplies(ProcessId),
    /// A waiting process's permission from `peer` is not accounted for exactly once: it should be
    /// either received, owed by the peer, or travelling as a REQUEST or REPLY.
    UnaccountedPermission {
        waiting: ProcessId,
        peer: ProcessId,
        found: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleHolders(ids) => {
                write!(f, "processes {ids:?} are all in the critical section")
            }
            Self::IdleButOwing(id) => write!(
                f,
                "process {id} owes replies although nobody wants the critical section"
            ),
            Self::IdleButInTransit(id) => write!(
                f,
                "process {id} has messages in transit although nobody wants the critical section"
            ),
            Self::StrayReplies(id) => write!(
                f,
                "process {id} holds replies without wanting the critical section"
            ),
            Self::UnaccountedPermission {
                waiting,
                peer,
                found,
            } => write!(
                f,
                "process {waiting} waits on process {peer}, whose permission is accounted for {found} times instead of once"
            ),
        }
    }
}

/// Function that checks a snapshot and returns every violation found.
pub fn check(document: &SnapshotDocument) -> Vec<Violation> {
    let mut violations = Vec::new();
    let records = &document.snapshot;

    let holders: Vec<ProcessId> = records
        .iter()
        .filter(|(_, record)| record.is_in_critical_section)
        .map(|(&id, _)| id)
        .collect();
    if holders.len() > 1 {
        violations.push(Violation::MultipleHolders(holders));
    }

    if records.values().all(|record| !record.wants_critical_section) {
        for (&id, record) in records {
            if !record.requests_this_process_must_reply_to.is_empty() {
                violations.push(Violation::IdleButOwing(id));
            }
            if record
                .messages_that_were_in_transit
                .values()
                .any(|messages| !messages.is_empty())
            {
                violations.push(Violation::IdleButInTransit(id));
            }
        }
    }

    for (&id, record) in records {
        if !record.replies_this_process_received.is_empty()
            && !(record.is_in_critical_section || record.wants_critical_section)
        {
            violations.push(Violation::StrayReplies(id));
        }
    }

    for (&waiting, record) in records {
        if !record.wants_critical_section || record.is_in_critical_section {
            continue;
        }
        for (&peer, other) in records {
            if peer == waiting {
                continue;
            }
            let found = permission_count(waiting, record, peer, other);
            if found != 1 {
                violations.push(Violation::UnaccountedPermission {
                    waiting,
                    peer,
                    found,
                });
            }
        }
    }

    violations
}

/// Counts where `peer`'s answer to `waiting`'s request currently sits in the cut.
fn permission_count(
    waiting: ProcessId,
    record: &ProcessRecord,
    peer: ProcessId,
    other: &ProcessRecord,
) -> usize {
    let received = record.replies_this_process_received.contains(&peer);
    let owed = other
        .requests_this_process_must_reply_to
        .iter()
        .any(|request| request.process_id == waiting);
    let reply_in_transit = in_transit(record, peer)
        .any(|message| matches!(message, Message::Reply { sender, .. } if sender == peer));
    let request_in_transit = in_transit(other, waiting)
        .any(|message| matches!(message, Message::Request { sender, .. } if sender == waiting));

    [received, owed, reply_in_transit, request_in_transit]
        .into_iter()
        .filter(|&found| found)
        .count()
}

/// Messages recorded on the channel from `from` into the process owning `record`.
fn in_transit(record: &ProcessRecord, from: ProcessId) -> impl Iterator<Item = Message> + '_ {
    record
        .messages_that_were_in_transit
        .get(&from)
        .into_iter()
        .flatten()
        .filter_map(|line| line.parse::<Message>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::Request, snapshot::ProcessRecord};
    use std::collections::BTreeMap;

    fn record(holding: bool, wanting: bool) -> ProcessRecord {
        ProcessRecord {
            time: 1,
            is_in_critical_section: holding,
            wants_critical_section: wanting,
            requests_this_process_must_reply_to: Vec::new(),
            replies_this_process_received: Vec::new(),
            messages_that_were_in_transit: BTreeMap::new(),
        }
    }

    fn document(records: Vec<ProcessRecord>) -> SnapshotDocument {
        SnapshotDocument {
            snapshot: records
                .into_iter()
                .enumerate()
                .map(|(i, r)| (i as ProcessId + 1, r))
                .collect(),
        }
    }

    #[test]
    fn quiet_system_is_consistent() {
        let doc = document(vec![record(false, false), record(false, false)]);
        assert!(check(&doc).is_empty());
    }

    #[test]
    fn two_holders_is_a_violation() {
        let doc = document(vec![record(true, false), record(true, false), record(false, false)]);
        assert_eq!(check(&doc), vec![Violation::MultipleHolders(vec![1, 2])]);
    }

    #[test]
    fn idle_system_must_be_drained() {
        let mut owing = record(false, false);
        owing
            .requests_this_process_must_reply_to
            .push(Request::new(3, 2));
        let mut busy = record(false, false);
        busy.messages_that_were_in_transit
            .insert(1, vec!["REPLY 4 1".to_string()]);

        assert_eq!(
            check(&document(vec![owing, busy])),
            vec![Violation::IdleButOwing(1), Violation::IdleButInTransit(2)]
        );
    }

    #[test]
    fn waiting_process_with_no_permission_anywhere_is_stuck() {
        let doc = document(vec![record(false, true), record(false, false), record(false, false)]);
        assert_eq!(
            check(&doc),
            vec![
                Violation::UnaccountedPermission {
                    waiting: 1,
                    peer: 2,
                    found: 0
                },
                Violation::UnaccountedPermission {
                    waiting: 1,
                    peer: 3,
                    found: 0
                },
            ]
        );
    }

    #[test]
    fn every_permission_location_counts() {
        let mut waiting = record(false, true);
        waiting.replies_this_process_received.push(2);
        waiting
            .messages_that_were_in_transit
            .insert(3, vec!["REPLY 6 3".to_string()]);
        let replied = record(false, false);
        let replying = record(false, false);
        let mut holding = record(true, false);
        holding
            .requests_this_process_must_reply_to
            .push(Request::new(2, 1));
        let mut unaware = record(false, false);
        unaware
            .messages_that_were_in_transit
            .insert(1, vec!["REQUEST 2 1".to_string()]);

        let doc = document(vec![waiting, replied, replying, holding, unaware]);
        assert!(check(&doc).is_empty(), "{:?}", check(&doc));
    }

    #[test]
    fn permission_counted_twice_is_a_violation() {
        let mut waiting = record(false, true);
        waiting.replies_this_process_received.push(2);
        let mut peer = record(false, false);
        peer.requests_this_process_must_reply_to
            .push(Request::new(2, 1));

        assert_eq!(
            check(&document(vec![waiting, peer])),
            vec![Violation::UnaccountedPermission {
                waiting: 1,
                peer: 2,
                found: 2
            }]
        );
    }

    #[test]
    fn replies_require_interest() {
        let mut stray = record(false, false);
        stray.replies_this_process_received.push(2);
        let mut wanting = record(false, true);
        wanting.replies_this_process_received.push(1);

        assert_eq!(
            check(&document(vec![stray, wanting])),
            vec![Violation::StrayReplies(1)]
        );
    }
}
