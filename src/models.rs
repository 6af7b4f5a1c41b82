use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::atomic::{AtomicI64, Ordering},
};
use tracing::warn;

/// Identifier as handed out by the remote sheet. Numbers are accepted and kept as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Float(f64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Int(number) => Self(number.to_string()),
            Raw::Float(number) => Self(number.to_string()),
        })
    }
}

static LAST_PROVISIONAL_MILLIS: AtomicI64 = AtomicI64::new(0);

/// An identifier the client made up before the server acknowledged the record.
///
/// Generated ids follow `<prefix>-<unix millis>`; within one process the millis
/// part is forced to increase so two adds in the same millisecond stay distinct.
/// Across devices nothing prevents collisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionalId {
    Pending(EntityId),
    Confirmed(EntityId),
}

impl ProvisionalId {
    pub fn generate(prefix: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        let previous = LAST_PROVISIONAL_MILLIS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let millis = now.max(previous + 1);
        Self::Pending(EntityId(format!("{prefix}-{millis}")))
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Pending(id) | Self::Confirmed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Marks the id as acknowledged, adopting the server's id when it assigned one.
    pub fn confirm(self, assigned: Option<EntityId>) -> Self {
        match self {
            Self::Pending(id) | Self::Confirmed(id) => Self::Confirmed(assigned.unwrap_or(id)),
        }
    }
}

impl Serialize for ProvisionalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProvisionalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        EntityId::deserialize(deserializer).map(Self::Confirmed)
    }
}

/// Calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let head = value.trim().get(..7).unwrap_or(value);
        NaiveDate::parse_from_str(&format!("{head}-01"), "%Y-%m-%d")
            .map(Self::of)
            .map_err(|err| format!("invalid year-month '{value}': {err}"))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

/// `YYYY-MM-DD` dates; longer timestamps are cut to their date part.
pub mod calendar_date {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(value: &str) -> Result<NaiveDate, chrono::ParseError> {
        let value = value.trim();
        NaiveDate::parse_from_str(value.get(..10).unwrap_or(value), "%Y-%m-%d")
    }

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format("%Y-%m-%d"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(|err| de::Error::custom(format!("invalid date '{raw}': {err}")))
    }
}

/// Sheet cells come back as `""` when empty; treat those like a missing value.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub id: EntityId,
    pub name: String,
    #[serde(rename = "startdate", with = "calendar_date")]
    pub start_date: NaiveDate,
    #[serde(rename = "enddate", with = "calendar_date")]
    pub end_date: NaiveDate,
}

impl Period {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: EntityId,
    pub name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub affiliation: Option<String>,
    #[serde(rename = "joinmonth", default, deserialize_with = "blank_as_none")]
    pub join_month: Option<YearMonth>,
    #[serde(rename = "leavemonth", default, deserialize_with = "blank_as_none")]
    pub leave_month: Option<YearMonth>,
}

impl Member {
    /// Whether the date's month falls inside the member's join/leave window.
    pub fn is_active_at(&self, date: NaiveDate) -> bool {
        let month = YearMonth::of(date);
        self.join_month.is_none_or(|join| month >= join)
            && self.leave_month.is_none_or(|leave| month <= leave)
    }

    /// Whether the membership window overlaps any month of the period.
    pub fn overlaps(&self, period: &Period) -> bool {
        self.join_month
            .is_none_or(|join| join <= YearMonth::of(period.end_date))
            && self
                .leave_month
                .is_none_or(|leave| leave >= YearMonth::of(period.start_date))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EntityId,
    pub title: String,
    #[serde(with = "calendar_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub canceled: bool,
}

/// Checkbox cells arrive as booleans, `"TRUE"`/`"FALSE"`, numbers or blanks.
fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Cell {
        Flag(bool),
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Cell>::deserialize(deserializer)? {
        None => false,
        Some(Cell::Flag(flag)) => flag,
        Some(Cell::Number(number)) => number != 0.0,
        Some(Cell::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "no" => false,
            "true" | "1" | "yes" => true,
            other => {
                warn!("treating unknown flag value '{other}' as false");
                false
            }
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttendanceStatus {
    Attending,
    Observing,
    Absent,
    Undecided,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Attending,
        AttendanceStatus::Observing,
        AttendanceStatus::Absent,
        AttendanceStatus::Undecided,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attending => "attending",
            Self::Observing => "observing",
            Self::Absent => "absent",
            Self::Undecided => "undecided",
        }
    }

    /// Attending and observing both count as presence in rates.
    pub fn counts_as_present(self) -> bool {
        matches!(self, Self::Attending | Self::Observing)
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "attending" | "出席" => Ok(Self::Attending),
            "observing" | "見学" => Ok(Self::Observing),
            "absent" | "欠席" => Ok(Self::Absent),
            "undecided" | "未定" => Ok(Self::Undecided),
            other => Err(format!("unknown attendance status '{other}'")),
        }
    }
}

impl Serialize for AttendanceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AttendanceStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(default)]
    pub comment: String,
}

/// Attendance is keyed by `"<eventId>_<memberId>"` on the wire.
///
/// The split happens at the first underscore, so event ids must not contain one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttendanceKey {
    pub event_id: EntityId,
    pub member_id: EntityId,
}

impl AttendanceKey {
    pub fn new(event_id: EntityId, member_id: EntityId) -> Self {
        Self { event_id, member_id }
    }
}

impl fmt::Display for AttendanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.event_id, self.member_id)
    }
}

impl FromStr for AttendanceKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('_') {
            Some((event, member)) if !event.is_empty() && !member.is_empty() => Ok(Self {
                event_id: EntityId::from(event),
                member_id: EntityId::from(member),
            }),
            _ => Err(format!("invalid attendance key '{value}'")),
        }
    }
}

impl Serialize for AttendanceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AttendanceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppData {
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default, deserialize_with = "lenient_attendance")]
    pub attendance: BTreeMap<AttendanceKey, AttendanceRecord>,
}

/// Drops attendance rows with a malformed key or record instead of failing the dataset.
fn lenient_attendance<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<AttendanceKey, AttendanceRecord>, D::Error> {
    let rows = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut attendance = BTreeMap::new();
    for (key, row) in rows {
        let parsed = key
            .parse::<AttendanceKey>()
            .and_then(|key| {
                AttendanceRecord::deserialize(row)
                    .map(|record| (key, record))
                    .map_err(|err| err.to_string())
            });
        match parsed {
            Ok((key, record)) => {
                attendance.insert(key, record);
            }
            Err(err) => warn!("skipping attendance row '{key}': {err}"),
        }
    }
    Ok(attendance)
}

/// (collection, canonical, legacy) names of the date-window fields.
const LEGACY_WINDOW_FIELDS: [(&str, &str, &str); 4] = [
    ("periods", "startdate", "startDate"),
    ("periods", "enddate", "endDate"),
    ("members", "joinmonth", "joinMonth"),
    ("members", "leavemonth", "leaveMonth"),
];

impl AppData {
    /// Decodes a stored or served dataset, folding legacy camelCase date-window
    /// fields into their canonical names. A non-blank canonical value wins.
    pub fn from_value(mut value: Value) -> Result<Self, serde_json::Error> {
        for (collection, canonical, legacy) in LEGACY_WINDOW_FIELDS {
            let Some(records) = value.get_mut(collection).and_then(Value::as_array_mut) else {
                continue;
            };
            for record in records.iter_mut().filter_map(Value::as_object_mut) {
                let legacy_value = record.remove(legacy);
                let canonical_blank = match record.get(canonical) {
                    None | Some(Value::Null) => true,
                    Some(Value::String(text)) => text.trim().is_empty(),
                    Some(_) => false,
                };
                if let (true, Some(legacy_value)) = (canonical_blank, legacy_value) {
                    record.insert(canonical.to_string(), legacy_value);
                }
            }
        }
        serde_json::from_value(value)
    }

    pub fn period(&self, id: &EntityId) -> Option<&Period> {
        self.periods.iter().find(|period| &period.id == id)
    }

    pub fn member(&self, id: &EntityId) -> Option<&Member> {
        self.members.iter().find(|member| &member.id == id)
    }

    pub fn event(&self, id: &EntityId) -> Option<&Event> {
        self.events.iter().find(|event| &event.id == id)
    }

    pub fn attendance_of(&self, event_id: &EntityId, member_id: &EntityId) -> Option<&AttendanceRecord> {
        self.attendance
            .get(&AttendanceKey::new(event_id.clone(), member_id.clone()))
    }
}

/// Master records editable through add/update/delete actions.
pub trait MasterRecord: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;
    fn set_id(&mut self, id: EntityId);
    fn collection(data: &AppData) -> &Vec<Self>;
    fn collection_mut(data: &mut AppData) -> &mut Vec<Self>;
    /// Request body fields; date windows use the camelCase names the endpoint expects.
    fn wire_payload(&self) -> Value;
    fn validate(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Period,
    Member,
    Event,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Period => "period",
            Self::Member => "member",
            Self::Event => "event",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Period => "p",
            Self::Member => "m",
            Self::Event => "e",
        }
    }
}

fn month_or_blank(month: Option<YearMonth>) -> String {
    month.map(|month| month.to_string()).unwrap_or_default()
}

impl MasterRecord for Period {
    const KIND: EntityKind = EntityKind::Period;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn collection(data: &AppData) -> &Vec<Self> {
        &data.periods
    }

    fn collection_mut(data: &mut AppData) -> &mut Vec<Self> {
        &mut data.periods
    }

    fn wire_payload(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "startDate": self.start_date.format("%Y-%m-%d").to_string(),
            "endDate": self.end_date.format("%Y-%m-%d").to_string(),
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("period name is required".into());
        }
        if self.start_date > self.end_date {
            return Err("period must not end before it starts".into());
        }
        Ok(())
    }
}

impl MasterRecord for Member {
    const KIND: EntityKind = EntityKind::Member;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn collection(data: &AppData) -> &Vec<Self> {
        &data.members
    }

    fn collection_mut(data: &mut AppData) -> &mut Vec<Self> {
        &mut data.members
    }

    fn wire_payload(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "affiliation": self.affiliation.clone().unwrap_or_default(),
            "joinMonth": month_or_blank(self.join_month),
            "leaveMonth": month_or_blank(self.leave_month),
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("member name is required".into());
        }
        match (self.join_month, self.leave_month) {
            (Some(join), Some(leave)) if leave < join => {
                Err("member must not leave before joining".into())
            }
            _ => Ok(()),
        }
    }
}

impl MasterRecord for Event {
    const KIND: EntityKind = EntityKind::Event;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn collection(data: &AppData) -> &Vec<Self> {
        &data.events
    }

    fn collection_mut(data: &mut AppData) -> &mut Vec<Self> {
        &mut data.events
    }

    fn wire_payload(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "date": self.date.format("%Y-%m-%d").to_string(),
            "time": self.time,
            "location": self.location,
            "note": self.note.clone().unwrap_or_default(),
            "canceled": self.canceled,
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("event title is required".into());
        }
        Ok(())
    }
}

// Album

/// A photo is identified by its file name within the album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub url: String,
}

impl Photo {
    pub fn photo_id(&self) -> EntityId {
        EntityId::from(self.file_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "commentId")]
    pub comment_id: ProvisionalId,
    #[serde(rename = "photoId")]
    pub photo_id: EntityId,
    #[serde(rename = "postUserId")]
    pub post_user_id: EntityId,
    #[serde(rename = "userName", default)]
    pub user_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    pub fn id(&self) -> &EntityId {
        self.comment_id.id()
    }

    pub fn is_owned_by(&self, member_id: &EntityId) -> bool {
        &self.post_user_id == member_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionType {
    Like,
    Love,
    Laugh,
    Party,
}

impl ReactionType {
    pub const ALL: [ReactionType; 4] = [
        ReactionType::Like,
        ReactionType::Love,
        ReactionType::Laugh,
        ReactionType::Party,
    ];
}

/// Aggregate reaction counts on one comment plus the viewer's own choice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommentReactions {
    #[serde(default)]
    pub like: u32,
    #[serde(default)]
    pub love: u32,
    #[serde(default)]
    pub laugh: u32,
    #[serde(default)]
    pub party: u32,
    #[serde(rename = "userReaction", default)]
    pub user_reaction: Option<ReactionType>,
}

impl CommentReactions {
    pub fn count(&self, kind: ReactionType) -> u32 {
        match kind {
            ReactionType::Like => self.like,
            ReactionType::Love => self.love,
            ReactionType::Laugh => self.laugh,
            ReactionType::Party => self.party,
        }
    }

    fn count_mut(&mut self, kind: ReactionType) -> &mut u32 {
        match kind {
            ReactionType::Like => &mut self.like,
            ReactionType::Love => &mut self.love,
            ReactionType::Laugh => &mut self.laugh,
            ReactionType::Party => &mut self.party,
        }
    }

    /// Viewer picks `kind`: picking the active type clears it, picking another
    /// moves the viewer's single reaction over.
    pub fn toggled(&self, kind: ReactionType) -> Self {
        let mut next = self.clone();
        if let Some(active) = self.user_reaction {
            let count = next.count_mut(active);
            *count = count.saturating_sub(1);
        }
        if self.user_reaction == Some(kind) {
            next.user_reaction = None;
        } else {
            let count = next.count_mut(kind);
            *count = count.saturating_add(1);
            next.user_reaction = Some(kind);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        calendar_date::parse(value).unwrap()
    }

    #[test]
    fn member_joined_in_may_is_inactive_in_april() {
        let member = Member {
            id: EntityId::from("m-1"),
            name: "Aoi".into(),
            affiliation: None,
            join_month: Some("2024-05".parse().unwrap()),
            leave_month: None,
        };
        assert!(!member.is_active_at(date("2024-04-15")));
        assert!(member.is_active_at(date("2024-05-01")));
        assert!(member.is_active_at(date("2024-06-01")));
    }

    #[test]
    fn leaving_is_permanent_for_later_dates() {
        let member = Member {
            id: EntityId::from("m-2"),
            name: "Ren".into(),
            affiliation: None,
            join_month: None,
            leave_month: Some("2024-07".parse().unwrap()),
        };
        let mut day = date("2024-01-01");
        let mut seen_inactive = false;
        while day < date("2025-12-31") {
            let active = member.is_active_at(day);
            if seen_inactive {
                assert!(!active, "became active again on {day}");
            }
            seen_inactive |= !active;
            day = day.succ_opt().unwrap();
        }
        assert!(seen_inactive);
        assert!(member.is_active_at(date("2024-07-31")));
        assert!(!member.is_active_at(date("2024-08-01")));
    }

    #[test]
    fn toggling_same_reaction_twice_clears_it() {
        let start = CommentReactions {
            like: 2,
            ..Default::default()
        };
        let once = start.toggled(ReactionType::Like);
        assert_eq!(once.like, 3);
        assert_eq!(once.user_reaction, Some(ReactionType::Like));

        let twice = once.toggled(ReactionType::Like);
        assert_eq!(twice, start);
    }

    #[test]
    fn switching_reaction_moves_the_single_vote() {
        let start = CommentReactions {
            like: 3,
            love: 1,
            user_reaction: Some(ReactionType::Like),
            ..Default::default()
        };
        let next = start.toggled(ReactionType::Love);
        assert_eq!(next.like, 2);
        assert_eq!(next.love, 2);
        assert_eq!(next.user_reaction, Some(ReactionType::Love));
    }

    #[test]
    fn any_toggle_sequence_leaves_one_vote_at_most() {
        let sequence = [
            ReactionType::Party,
            ReactionType::Like,
            ReactionType::Like,
            ReactionType::Laugh,
            ReactionType::Love,
            ReactionType::Love,
            ReactionType::Party,
        ];
        let mut reactions = CommentReactions::default();
        for kind in sequence {
            reactions = reactions.toggled(kind);
            let total: u32 = ReactionType::ALL.iter().map(|kind| reactions.count(*kind)).sum();
            assert_eq!(total, u32::from(reactions.user_reaction.is_some()));
        }
    }

    #[test]
    fn attendance_key_uses_first_underscore() {
        let key: AttendanceKey = "e-17_m-42".parse().unwrap();
        assert_eq!(key.event_id.as_str(), "e-17");
        assert_eq!(key.member_id.as_str(), "m-42");
        assert_eq!(key.to_string(), "e-17_m-42");
        assert!("nounderscore".parse::<AttendanceKey>().is_err());
    }

    #[test]
    fn sheet_values_decode_leniently() {
        let value = json!({
            "periods": [{"id": 7, "name": "Spring", "startdate": "2024-04-01T00:00:00.000Z", "enddate": "2024-09-30"}],
            "members": [{"id": "m-1", "name": "Aoi", "affiliation": "", "joinmonth": "", "leavemonth": "2024-08"}],
            "events": [{"id": "e-1", "title": "Practice", "date": "2024-04-15", "time": "18:00", "location": "Gym", "note": ""}],
            "attendance": {"e-1_m-1": {"status": "出席", "comment": ""}, "e-1_m-2": {"status": "", "comment": "late"}}
        });
        let data = AppData::from_value(value).unwrap();
        assert_eq!(data.periods[0].id.as_str(), "7");
        assert_eq!(data.periods[0].start_date, date("2024-04-01"));
        assert_eq!(data.members[0].affiliation, None);
        assert_eq!(data.members[0].join_month, None);
        assert_eq!(data.members[0].leave_month.unwrap().to_string(), "2024-08");
        assert_eq!(data.events[0].note, None);
        let key = AttendanceKey::new("e-1".into(), "m-1".into());
        assert_eq!(data.attendance[&key].status, Some(AttendanceStatus::Attending));
        let blank = AttendanceKey::new("e-1".into(), "m-2".into());
        assert_eq!(data.attendance[&blank].status, None);
    }

    #[test]
    fn canceled_cells_decode_from_sheet_text() {
        let value = json!({
            "events": [
                {"id": "e-1", "title": "A", "date": "2024-04-15", "canceled": ""},
                {"id": "e-2", "title": "B", "date": "2024-04-16", "canceled": "TRUE"},
                {"id": "e-3", "title": "C", "date": "2024-04-17", "canceled": "FALSE"},
                {"id": "e-4", "title": "D", "date": "2024-04-18", "canceled": true},
                {"id": "e-5", "title": "E", "date": "2024-04-19", "canceled": null},
                {"id": "e-6", "title": "F", "date": "2024-04-20"}
            ]
        });
        let data = AppData::from_value(value).unwrap();
        let canceled: Vec<bool> = data.events.iter().map(|event| event.canceled).collect();
        assert_eq!(canceled, [false, true, false, true, false, false]);
    }

    #[test]
    fn malformed_attendance_rows_are_skipped() {
        let value = json!({
            "attendance": {
                "e-1_m-1": {"status": "absent", "comment": ""},
                "nounderscore": {"status": "absent", "comment": ""},
                "e-1_m-2": {"status": "maybe", "comment": ""}
            }
        });
        let data = AppData::from_value(value).unwrap();
        assert_eq!(data.attendance.len(), 1);
        let key = AttendanceKey::new("e-1".into(), "m-1".into());
        assert_eq!(data.attendance[&key].status, Some(AttendanceStatus::Absent));
    }

    #[test]
    fn legacy_window_fields_fold_into_canonical_names() {
        let value = json!({
            "periods": [
                {"id": "p-1", "name": "Old", "startDate": "2023-04-01", "endDate": "2023-09-30"},
                {"id": "p-2", "name": "Both", "startdate": "2024-04-01", "startDate": "1999-01-01", "enddate": "", "endDate": "2024-09-30"}
            ],
            "members": [{"id": "m-1", "name": "Aoi", "joinMonth": "2023-05", "leaveMonth": ""}]
        });
        let data = AppData::from_value(value).unwrap();
        assert_eq!(data.periods[0].start_date, date("2023-04-01"));
        assert_eq!(data.periods[1].start_date, date("2024-04-01"));
        assert_eq!(data.periods[1].end_date, date("2024-09-30"));
        assert_eq!(data.members[0].join_month.unwrap().to_string(), "2023-05");

        let written = serde_json::to_value(&data).unwrap();
        assert!(written["periods"][0].get("startDate").is_none());
        assert_eq!(written["periods"][0]["startdate"], "2023-04-01");
        assert_eq!(written["members"][0]["joinmonth"], "2023-05");
    }

    #[test]
    fn provisional_ids_are_unique_and_confirmable() {
        let first = ProvisionalId::generate("p");
        let second = ProvisionalId::generate("p");
        assert!(first.is_pending());
        assert_ne!(first.id(), second.id());
        assert!(first.id().as_str().starts_with("p-"));

        let kept = first.clone().confirm(None);
        assert_eq!(kept, ProvisionalId::Confirmed(first.id().clone()));
        let assigned = second.confirm(Some(EntityId::from("99")));
        assert_eq!(assigned.id().as_str(), "99");
        assert!(!assigned.is_pending());
    }
}
