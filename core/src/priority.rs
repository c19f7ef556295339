//! Priority policy for choosing the next waiting ticket.
//!
//! | Tier | Rule |
//! |------|------|
//! | 0 `Overdue`  | appointment time already passed |
//! | 1 `Imminent` | appointment starts within the next [`APPOINTMENT_LOOKAHEAD_MINUTES`] |
//! | 2 `Regular`  | later appointments and walk-ins |
//!
//! Within a tier: earliest appointment first (walk-ins last), then earliest creation,
//! then lowest id. Only appointments on the same calendar day (UTC) as `now` count.
//!
//! The Postgres store expresses the same ordering in SQL; the in-memory store sorts
//! by [`PriorityKey`].

use crate::ticket::{Ticket, TicketId};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use std::cmp::Ordering;

/// Appointments starting this soon are promoted to [`PriorityTier::Imminent`].
pub const APPOINTMENT_LOOKAHEAD_MINUTES: i64 = 5;

/// Coarse priority bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    /// Appointment time already passed
    Overdue = 0,
    /// Appointment starts within the lookahead
    Imminent = 1,
    /// Everything else
    Regular = 2,
}

impl PriorityTier {
    /// Classify an appointment time relative to `now`.
    #[must_use]
    pub fn classify(appointment_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match appointment_at {
            Some(at) if at < now => Self::Overdue,
            Some(at) if at <= now + TimeDelta::minutes(APPOINTMENT_LOOKAHEAD_MINUTES) => {
                Self::Imminent
            }
            _ => Self::Regular,
        }
    }
}

/// Bounds `[start, end)` of the UTC day containing `now`.
#[must_use]
pub fn day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + TimeDelta::days(1))
}

/// Sort key for a waiting ticket. Smaller keys are called first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityKey {
    tier: PriorityTier,
    appointment_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    id: TicketId,
}

impl PriorityKey {
    /// Build the key for `ticket` with its appointment time, as seen at `now`.
    ///
    /// Appointments on another day are ignored.
    #[must_use]
    pub fn new(ticket: &Ticket, appointment_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let (start, end) = day_bounds(now);
        let appointment_at = appointment_at.filter(|at| *at >= start && *at < end);
        Self {
            tier: PriorityTier::classify(appointment_at, now),
            appointment_at,
            created_at: ticket.created_at,
            id: ticket.id,
        }
    }

    /// Priority tier.
    #[must_use]
    pub const fn tier(&self) -> PriorityTier {
        self.tier
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Walk-ins sort after any appointment, like NULLS LAST.
        let appointment = match (self.appointment_at, other.appointment_at) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        self.tier
            .cmp(&other.tier)
            .then(appointment)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ticket::{TicketNumber, TicketStatus};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        "2025-01-01T10:00:00Z".parse().unwrap()
    }

    fn ticket(id: i64, created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: TicketId::new(id),
            number: TicketNumber::new("A", u32::try_from(id).unwrap()),
            status: TicketStatus::Waiting,
            category_id: "consultation".to_string(),
            window_number: None,
            created_at,
            called_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn classify_tiers() {
        let now = now();
        assert_eq!(
            PriorityTier::classify(Some(now - TimeDelta::minutes(10)), now),
            PriorityTier::Overdue
        );
        assert_eq!(
            PriorityTier::classify(Some(now + TimeDelta::minutes(2)), now),
            PriorityTier::Imminent
        );
        assert_eq!(
            PriorityTier::classify(Some(now + TimeDelta::minutes(5)), now),
            PriorityTier::Imminent
        );
        assert_eq!(
            PriorityTier::classify(Some(now + TimeDelta::minutes(6)), now),
            PriorityTier::Regular
        );
        assert_eq!(PriorityTier::classify(None, now), PriorityTier::Regular);
    }

    #[test]
    fn overdue_then_imminent_then_walk_in() {
        let now = now();
        let t0 = now - TimeDelta::minutes(30);
        let t1 = PriorityKey::new(&ticket(1, t0), None, now);
        let t2 = PriorityKey::new(
            &ticket(2, t0 + TimeDelta::minutes(1)),
            Some(now - TimeDelta::minutes(10)),
            now,
        );
        let t3 = PriorityKey::new(
            &ticket(3, t0 + TimeDelta::minutes(2)),
            Some(now + TimeDelta::minutes(2)),
            now,
        );

        let mut keys = vec![t1, t2, t3];
        keys.sort();
        let order: Vec<i64> = keys.iter().map(|k| k.id.get()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn fifo_within_walk_ins() {
        let now = now();
        let early = PriorityKey::new(&ticket(7, now - TimeDelta::minutes(20)), None, now);
        let late = PriorityKey::new(&ticket(3, now - TimeDelta::minutes(5)), None, now);
        assert!(early < late);
    }

    #[test]
    fn appointments_on_other_days_are_ignored() {
        let now = now();
        let yesterday = PriorityKey::new(
            &ticket(1, now - TimeDelta::minutes(1)),
            Some(now - TimeDelta::days(1)),
            now,
        );
        assert_eq!(yesterday.tier(), PriorityTier::Regular);
    }

    proptest! {
        #[test]
        fn sorted_keys_have_non_decreasing_tiers(
            offsets in proptest::collection::vec(
                (proptest::option::of(-120i64..120), 0i64..600),
                1..40,
            ),
        ) {
            let now = now();
            let mut keys: Vec<PriorityKey> = offsets
                .iter()
                .enumerate()
                .map(|(i, (appt, created))| {
                    let t = ticket(i64::try_from(i).unwrap() + 1, now - TimeDelta::seconds(*created));
                    PriorityKey::new(&t, appt.map(|m| now + TimeDelta::minutes(m)), now)
                })
                .collect();
            keys.sort();
            for pair in keys.windows(2) {
                prop_assert!(pair[0].tier() <= pair[1].tier());
            }
        }
    }
}
