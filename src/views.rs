use crate::models::{AppData, AttendanceStatus, EntityId, Event, Member, Period, YearMonth};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberAnswer {
    pub member_id: EntityId,
    pub name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusGroup {
    pub status: AttendanceStatus,
    pub members: Vec<MemberAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTally {
    pub event_id: EntityId,
    pub title: String,
    pub attending: usize,
    pub observing: usize,
    pub absent: usize,
    pub undecided: usize,
    pub unanswered: usize,
    pub groups: Vec<StatusGroup>,
    pub unanswered_members: Vec<MemberAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRate {
    pub member_id: EntityId,
    pub name: String,
    pub affiliation: Option<String>,
    pub present: usize,
    pub total: usize,
    /// Percentage with one decimal, `"0.0"` when no event counted.
    pub rate: String,
    pub left: Option<YearMonth>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub period: Option<Period>,
    pub events: Vec<Event>,
}

/// Events dated inside the period, newest first.
pub fn events_in_period<'a>(data: &'a AppData, period: &Period) -> Vec<&'a Event> {
    let mut events: Vec<&Event> = data
        .events
        .iter()
        .filter(|event| period.contains(event.date))
        .collect();
    events.sort_by(|a, b| b.date.cmp(&a.date));
    events
}

pub fn active_members_at(data: &AppData, date: NaiveDate) -> Vec<&Member> {
    data.members
        .iter()
        .filter(|member| member.is_active_at(date))
        .collect()
}

/// The first period (in list order) whose window contains `today`.
pub fn current_period(data: &AppData, today: NaiveDate) -> Option<&Period> {
    data.periods.iter().find(|period| period.contains(today))
}

/// Events a member most likely wants to answer: all events on the nearest
/// upcoming date of the period, or on the latest past date if none is ahead.
pub fn default_events<'a>(data: &'a AppData, period: &Period, today: NaiveDate) -> Vec<&'a Event> {
    let dates: BTreeSet<NaiveDate> = data
        .events
        .iter()
        .filter(|event| period.contains(event.date) && !event.canceled)
        .map(|event| event.date)
        .collect();
    let target = dates
        .range(today..)
        .next()
        .or_else(|| dates.range(..today).next_back());

    match target {
        Some(target) => data
            .events
            .iter()
            .filter(|event| event.date == *target && !event.canceled)
            .collect(),
        None => Vec::new(),
    }
}

pub fn default_selection(data: &AppData, today: NaiveDate) -> Selection {
    match current_period(data, today) {
        Some(period) => Selection {
            period: Some(period.clone()),
            events: default_events(data, period, today)
                .into_iter()
                .cloned()
                .collect(),
        },
        None => Selection {
            period: None,
            events: Vec::new(),
        },
    }
}

/// Status counts over every answer for the event; unanswered counts active
/// members without any answer.
pub fn event_tally(data: &AppData, event: &Event) -> EventTally {
    let active = active_members_at(data, event.date);
    let answers: Vec<_> = data
        .attendance
        .iter()
        .filter(|(key, _)| key.event_id == event.id)
        .collect();

    let count = |status: AttendanceStatus| {
        answers
            .iter()
            .filter(|(_, record)| record.status == Some(status))
            .count()
    };

    let groups = AttendanceStatus::ALL
        .into_iter()
        .filter_map(|status| {
            let members: Vec<MemberAnswer> = answers
                .iter()
                .filter(|(_, record)| record.status == Some(status))
                .filter_map(|(key, record)| {
                    let member = active.iter().find(|member| member.id == key.member_id)?;
                    Some(MemberAnswer {
                        member_id: member.id.clone(),
                        name: member.name.clone(),
                        comment: record.comment.clone(),
                    })
                })
                .collect();
            (!members.is_empty()).then_some(StatusGroup { status, members })
        })
        .collect();

    let answered: BTreeSet<&EntityId> = answers.iter().map(|(key, _)| &key.member_id).collect();
    let unanswered_members: Vec<MemberAnswer> = active
        .iter()
        .filter(|member| !answered.contains(&member.id))
        .map(|member| MemberAnswer {
            member_id: member.id.clone(),
            name: member.name.clone(),
            comment: String::new(),
        })
        .collect();

    EventTally {
        event_id: event.id.clone(),
        title: event.title.clone(),
        attending: count(AttendanceStatus::Attending),
        observing: count(AttendanceStatus::Observing),
        absent: count(AttendanceStatus::Absent),
        undecided: count(AttendanceStatus::Undecided),
        unanswered: unanswered_members.len(),
        groups,
        unanswered_members,
    }
}

fn format_rate(present: usize, total: usize) -> (String, i64) {
    if total == 0 {
        return ("0.0".to_string(), 0);
    }
    let percent = present as f64 / total as f64 * 100.0;
    let tenths = (percent * 10.0).round() as i64;
    (format!("{percent:.1}"), tenths)
}

/// Attendance rate of every member whose window overlaps the period, highest
/// first. The denominator counts only non-canceled events the member was active for.
pub fn attendance_rates(data: &AppData, period: &Period) -> Vec<MemberRate> {
    let events: Vec<&Event> = data
        .events
        .iter()
        .filter(|event| period.contains(event.date) && !event.canceled)
        .collect();

    let mut rates: Vec<(i64, MemberRate)> = data
        .members
        .iter()
        .filter(|member| member.overlaps(period))
        .map(|member| {
            let counted: Vec<&&Event> = events
                .iter()
                .filter(|event| member.is_active_at(event.date))
                .collect();
            let present = counted
                .iter()
                .filter(|event| {
                    data.attendance_of(&event.id, &member.id)
                        .and_then(|record| record.status)
                        .is_some_and(AttendanceStatus::counts_as_present)
                })
                .count();
            let (rate, tenths) = format_rate(present, counted.len());
            (
                tenths,
                MemberRate {
                    member_id: member.id.clone(),
                    name: member.name.clone(),
                    affiliation: member.affiliation.clone(),
                    present,
                    total: counted.len(),
                    rate,
                    left: member.leave_month,
                },
            )
        })
        .collect();

    rates.sort_by(|(a, _), (b, _)| b.cmp(a));
    rates.into_iter().map(|(_, rate)| rate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{calendar_date, AttendanceKey, AttendanceRecord};

    fn date(value: &str) -> NaiveDate {
        calendar_date::parse(value).unwrap()
    }

    fn period() -> Period {
        Period {
            id: "p-1".into(),
            name: "Spring".into(),
            start_date: date("2024-04-01"),
            end_date: date("2024-09-30"),
        }
    }

    fn member(id: &str, join: Option<&str>, leave: Option<&str>) -> Member {
        Member {
            id: id.into(),
            name: id.to_uppercase(),
            affiliation: None,
            join_month: join.map(|month| month.parse().unwrap()),
            leave_month: leave.map(|month| month.parse().unwrap()),
        }
    }

    fn event(id: &str, day: &str) -> Event {
        Event {
            id: id.into(),
            title: format!("Practice {id}"),
            date: date(day),
            time: "18:00".into(),
            location: "Gym".into(),
            note: None,
            canceled: false,
        }
    }

    fn answer(data: &mut AppData, event: &str, member: &str, status: AttendanceStatus) {
        data.attendance.insert(
            AttendanceKey::new(event.into(), member.into()),
            AttendanceRecord {
                status: Some(status),
                comment: String::new(),
            },
        );
    }

    fn sample() -> AppData {
        AppData {
            periods: vec![period()],
            members: vec![
                member("a", None, None),
                member("b", Some("2024-05"), None),
                member("c", None, Some("2024-04")),
            ],
            events: vec![
                event("e1", "2024-04-15"),
                event("e2", "2024-06-01"),
                event("e3", "2024-06-01"),
                event("e4", "2023-12-24"),
            ],
            attendance: Default::default(),
        }
    }

    #[test]
    fn events_are_bounded_by_period_and_newest_first() {
        let data = sample();
        let ids: Vec<&str> = events_in_period(&data, &period())
            .iter()
            .map(|event| event.id.as_str())
            .collect();
        assert_eq!(ids, vec!["e2", "e3", "e1"]);
    }

    #[test]
    fn join_month_gates_activity() {
        let data = sample();
        let april: Vec<&str> = active_members_at(&data, date("2024-04-15"))
            .iter()
            .map(|member| member.id.as_str())
            .collect();
        assert_eq!(april, vec!["a", "c"]);
        let june: Vec<&str> = active_members_at(&data, date("2024-06-01"))
            .iter()
            .map(|member| member.id.as_str())
            .collect();
        assert_eq!(june, vec!["a", "b"]);
    }

    #[test]
    fn tally_counts_statuses_and_unanswered() {
        let mut data = sample();
        answer(&mut data, "e2", "a", AttendanceStatus::Attending);
        answer(&mut data, "e2", "c", AttendanceStatus::Absent);
        let tally = event_tally(&data, data.event(&"e2".into()).unwrap());
        assert_eq!(tally.attending, 1);
        assert_eq!(tally.absent, 1);
        assert_eq!(tally.unanswered, 1);
        assert_eq!(tally.unanswered_members[0].member_id.as_str(), "b");
        assert_eq!(tally.groups.len(), 1, "inactive member c is not listed by name");
        assert_eq!(tally.groups[0].status, AttendanceStatus::Attending);
    }

    #[test]
    fn blank_answer_still_counts_as_answered() {
        let mut data = sample();
        data.attendance.insert(
            AttendanceKey::new("e1".into(), "a".into()),
            AttendanceRecord {
                status: None,
                comment: "maybe".into(),
            },
        );
        let tally = event_tally(&data, data.event(&"e1".into()).unwrap());
        assert_eq!(tally.unanswered, 1);
        assert_eq!(tally.attending + tally.observing + tally.absent + tally.undecided, 0);
    }

    #[test]
    fn rates_use_active_events_as_denominator() {
        let mut data = sample();
        answer(&mut data, "e1", "a", AttendanceStatus::Attending);
        answer(&mut data, "e2", "a", AttendanceStatus::Observing);
        answer(&mut data, "e3", "a", AttendanceStatus::Absent);
        answer(&mut data, "e2", "b", AttendanceStatus::Attending);

        let rates = attendance_rates(&data, &period());
        let by_id = |id: &str| rates.iter().find(|rate| rate.member_id.as_str() == id).unwrap();
        assert_eq!(by_id("a").present, 2);
        assert_eq!(by_id("a").total, 3);
        assert_eq!(by_id("a").rate, "66.7");
        assert_eq!(by_id("b").total, 2);
        assert_eq!(by_id("b").rate, "50.0");
        assert_eq!(by_id("c").total, 1);
        assert_eq!(by_id("c").rate, "0.0");
        assert_eq!(rates[0].member_id.as_str(), "a");
    }

    #[test]
    fn zero_denominator_rate_is_zero() {
        let mut data = sample();
        data.members.push(member("d", Some("2024-10"), None));
        data.members.push(member("e", Some("2024-09"), None));
        let rates = attendance_rates(&data, &period());
        assert!(rates.iter().all(|rate| rate.member_id.as_str() != "d"));
        let late = rates.iter().find(|rate| rate.member_id.as_str() == "e").unwrap();
        assert_eq!(late.total, 0);
        assert_eq!(late.rate, "0.0");
    }

    #[test]
    fn equal_rates_keep_member_order() {
        let data = AppData {
            members: vec![member("z", None, None), member("y", None, None)],
            ..sample()
        };
        let rates = attendance_rates(&data, &period());
        let ids: Vec<&str> = rates.iter().map(|rate| rate.member_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "y"]);
    }

    #[test]
    fn canceled_events_do_not_count() {
        let mut data = sample();
        data.events.iter_mut().for_each(|event| event.canceled = event.id.as_str() != "e1");
        answer(&mut data, "e1", "a", AttendanceStatus::Attending);
        let rates = attendance_rates(&data, &period());
        let a = rates.iter().find(|rate| rate.member_id.as_str() == "a").unwrap();
        assert_eq!((a.present, a.total, a.rate.as_str()), (1, 1, "100.0"));
    }

    #[test]
    fn default_selection_prefers_next_event_date() {
        let data = sample();
        let selection = default_selection(&data, date("2024-05-10"));
        assert_eq!(selection.period.unwrap().id.as_str(), "p-1");
        let ids: Vec<&str> = selection.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);

        let after = default_selection(&data, date("2024-08-01"));
        let ids: Vec<&str> = after.events.iter().map(|event| event.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);

        let early = default_selection(&data, date("2024-04-02"));
        assert_eq!(early.events[0].id.as_str(), "e1");

        let outside = default_selection(&data, date("2025-01-01"));
        assert!(outside.period.is_none());
        assert!(outside.events.is_empty());
    }
}
