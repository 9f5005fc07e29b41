//! Data models for canvassing visits
//!
//! This module contains the entities the ingestion pipeline works on
//! (visits, addresses, people, audit records, scores, users and rankings),
//! the closed enumerations they use and the request payloads consumed by
//! the visit service.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FieldError, GroundGameError, Result};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifier of an [`Address`]
    AddressId
);
entity_id!(
    /// Identifier of a [`Person`]
    PersonId
);
entity_id!(
    /// Identifier of a [`Visit`]
    VisitId
);
entity_id!(
    /// Identifier of a [`Score`]
    ScoreId
);
entity_id!(
    /// Identifier of a [`PersonUpdate`]
    PersonUpdateId
);
entity_id!(
    /// Identifier of a [`User`]
    UserId
);

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Snake-case name used on the wire and in storage
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = GroundGameError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(GroundGameError::invalid(
                        stringify!($name),
                        "value",
                        &format!("unknown value '{other}'"),
                    )),
                }
            }
        }
    };
}

/// Latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A resident's stated support level, or the outcome of the doorstep
/// interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvassResponse {
    Unknown,
    StronglyFor,
    LeaningFor,
    Undecided,
    LeaningAgainst,
    StronglyAgainst,
    AskedToLeave,
    NotHome,
    NotYetVisited,
}

string_enum!(CanvassResponse {
    Unknown => "unknown",
    StronglyFor => "strongly_for",
    LeaningFor => "leaning_for",
    Undecided => "undecided",
    LeaningAgainst => "leaning_against",
    StronglyAgainst => "strongly_against",
    AskedToLeave => "asked_to_leave",
    NotHome => "not_home",
    NotYetVisited => "not_yet_visited",
});

impl CanvassResponse {
    /// Position on the supportiveness scale, higher is more supportive.
    ///
    /// Operational statuses and `unknown` have no rank.
    #[must_use]
    pub const fn support_rank(self) -> Option<u8> {
        match self {
            Self::StronglyFor => Some(5),
            Self::LeaningFor => Some(4),
            Self::Undecided => Some(3),
            Self::LeaningAgainst => Some(2),
            Self::StronglyAgainst => Some(1),
            Self::Unknown | Self::AskedToLeave | Self::NotHome | Self::NotYetVisited => None,
        }
    }

    #[must_use]
    pub const fn is_ranked(self) -> bool {
        self.support_rank().is_some()
    }

    /// Statuses that may be written directly onto an address.
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(
            self,
            Self::Unknown | Self::AskedToLeave | Self::NotHome | Self::NotYetVisited
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyAffiliation {
    #[serde(rename = "unknown_affiliation")]
    Unknown,
    #[serde(rename = "undeclared_affiliation")]
    Undeclared,
    #[serde(rename = "democrat_affiliation")]
    Democrat,
    #[serde(rename = "republican_affiliation")]
    Republican,
    #[serde(rename = "independent_affiliation")]
    Independent,
    #[serde(rename = "other_affiliation")]
    Other,
}

string_enum!(PartyAffiliation {
    Unknown => "unknown_affiliation",
    Undeclared => "undeclared_affiliation",
    Democrat => "democrat_affiliation",
    Republican => "republican_affiliation",
    Independent => "independent_affiliation",
    Other => "other_affiliation",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredContactMethod {
    Phone,
    Email,
}

string_enum!(PreferredContactMethod {
    Phone => "phone",
    Email => "email",
});

/// Whether the audited person row was created or modified by the visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Created,
    Modified,
}

string_enum!(UpdateType {
    Created => "created",
    Modified => "modified",
});

/// A canvassed household
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub latitude: f64,
    pub longitude: f64,
    pub street_1: Option<String>,
    pub street_2: Option<String>,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub zip_code: Option<String>,
    pub usps_verified_street_1: Option<String>,
    pub usps_verified_street_2: Option<String>,
    pub usps_verified_city: Option<String>,
    pub usps_verified_state: Option<String>,
    pub usps_verified_zip: Option<String>,
    pub best_canvass_response: CanvassResponse,
    pub last_canvass_response: CanvassResponse,
    /// Lookup-only back-reference to the resident holding the best response
    pub most_supportive_resident_id: Option<PersonId>,
    /// Optimistic concurrency token, bumped on every committed write
    pub lock_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Address {
    /// A new, unsaved address at the given coordinates.
    #[must_use]
    pub fn new(coordinates: Coordinates, street_1: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: AddressId::new(),
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            street_1,
            street_2: None,
            city: None,
            state_code: None,
            zip_code: None,
            usps_verified_street_1: None,
            usps_verified_street_2: None,
            usps_verified_city: None,
            usps_verified_state: None,
            usps_verified_zip: None,
            best_canvass_response: CanvassResponse::NotYetVisited,
            last_canvass_response: CanvassResponse::NotYetVisited,
            most_supportive_resident_id: None,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// A resident of an address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub address_id: AddressId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub canvass_response: CanvassResponse,
    pub party_affiliation: PartyAffiliation,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub preferred_contact_method: Option<PreferredContactMethod>,
    pub previously_participated_in_caucus_or_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Person {
    #[must_use]
    pub fn new(address_id: AddressId, now: DateTime<Utc>) -> Self {
        Self {
            id: PersonId::new(),
            address_id,
            first_name: None,
            last_name: None,
            canvass_response: CanvassResponse::Unknown,
            party_affiliation: PartyAffiliation::Unknown,
            email: None,
            phone: None,
            preferred_contact_method: None,
            previously_participated_in_caucus_or_primary: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Audit record of a change to a person's response or affiliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonUpdate {
    pub id: PersonUpdateId,
    pub person_id: PersonId,
    pub visit_id: VisitId,
    pub update_type: UpdateType,
    pub old_canvass_response: Option<CanvassResponse>,
    pub new_canvass_response: CanvassResponse,
    pub old_party_affiliation: Option<PartyAffiliation>,
    pub new_party_affiliation: PartyAffiliation,
    pub created_at: DateTime<Utc>,
}

/// Draft of a [`PersonUpdate`] whose required fields are not yet checked
#[derive(Debug, Clone, Default)]
pub struct NewPersonUpdate {
    pub person_id: Option<PersonId>,
    pub visit_id: Option<VisitId>,
    pub update_type: Option<UpdateType>,
    pub old_canvass_response: Option<CanvassResponse>,
    pub new_canvass_response: Option<CanvassResponse>,
    pub old_party_affiliation: Option<PartyAffiliation>,
    pub new_party_affiliation: Option<PartyAffiliation>,
}

impl NewPersonUpdate {
    /// Check required fields and produce the audit record.
    pub fn validate(self, now: DateTime<Utc>) -> Result<PersonUpdate> {
        let mut errors = Vec::new();
        if self.person_id.is_none() {
            errors.push(FieldError::new("person", "can't be blank"));
        }
        if self.visit_id.is_none() {
            errors.push(FieldError::new("visit", "can't be blank"));
        }
        if self.new_canvass_response.is_none() {
            errors.push(FieldError::new("new_canvass_response", "can't be blank"));
        }
        if self.new_party_affiliation.is_none() {
            errors.push(FieldError::new("new_party_affiliation", "can't be blank"));
        }

        match (
            self.person_id,
            self.visit_id,
            self.new_canvass_response,
            self.new_party_affiliation,
        ) {
            (Some(person_id), Some(visit_id), Some(new_canvass_response), Some(new_party_affiliation)) => {
                Ok(PersonUpdate {
                    id: PersonUpdateId::new(),
                    person_id,
                    visit_id,
                    update_type: self.update_type.unwrap_or(UpdateType::Created),
                    old_canvass_response: self.old_canvass_response,
                    new_canvass_response,
                    old_party_affiliation: self.old_party_affiliation,
                    new_party_affiliation,
                    created_at: now,
                })
            }
            _ => Err(GroundGameError::ValidationFailed {
                entity: "person_update",
                errors,
            }),
        }
    }
}

/// A visit before its coordinates have been corrected
#[derive(Debug, Clone, PartialEq)]
pub struct DraftVisit {
    pub id: VisitId,
    pub user_id: UserId,
    pub submitted: Coordinates,
    pub submitted_street_1: Option<String>,
    pub duration_sec: u32,
    pub created_at: DateTime<Utc>,
}

impl DraftVisit {
    /// Finish the visit once the address is resolved and the score known.
    #[must_use]
    pub fn complete(&self, corrected: Coordinates, address_id: AddressId, total_points: i64) -> Visit {
        Visit {
            id: self.id,
            user_id: self.user_id,
            address_id,
            submitted_latitude: self.submitted.latitude,
            submitted_longitude: self.submitted.longitude,
            corrected_latitude: corrected.latitude,
            corrected_longitude: corrected.longitude,
            submitted_street_1: self.submitted_street_1.clone(),
            duration_sec: self.duration_sec,
            total_points,
            created_at: self.created_at,
        }
    }
}

/// A single canvassing report submitted by a volunteer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub submitted_latitude: f64,
    pub submitted_longitude: f64,
    pub corrected_latitude: f64,
    pub corrected_longitude: f64,
    pub submitted_street_1: Option<String>,
    pub duration_sec: u32,
    pub total_points: i64,
    pub created_at: DateTime<Utc>,
}

/// Points earned by a visit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub id: ScoreId,
    pub visit_id: VisitId,
    pub points_for_knock: i64,
    pub points_for_updates: i64,
}

impl Score {
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.points_for_knock + self.points_for_updates
    }
}

/// A volunteer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub state_code: Option<String>,
    /// Denormalized sum of the user's visit points
    pub total_points: i64,
}

impl User {
    #[must_use]
    pub fn new(email: impl Into<String>, state_code: Option<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            state_code,
            total_points: 0,
        }
    }
}

/// Partition of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subject", rename_all = "snake_case")]
pub enum RankingScope {
    Everyone,
    State(String),
    Friends(UserId),
}

impl RankingScope {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::State(_) => "state",
            Self::Friends(_) => "friends",
        }
    }

    /// Discriminating subject of the scope, empty for the global board.
    #[must_use]
    pub fn subject(&self) -> String {
        match self {
            Self::Everyone => String::new(),
            Self::State(code) => code.clone(),
            Self::Friends(owner) => owner.to_string(),
        }
    }
}

impl fmt::Display for RankingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everyone => f.write_str("everyone"),
            Self::State(code) => write!(f, "state:{code}"),
            Self::Friends(owner) => write!(f, "friends:{owner}"),
        }
    }
}

/// One materialized leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub scope: RankingScope,
    pub user_id: UserId,
    pub score: i64,
    /// 1-based position within the scope
    pub rank: u32,
}

/// Address resource side-loaded with a visit request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressPayload {
    pub id: Option<AddressId>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub street_1: Option<String>,
    pub street_2: Option<String>,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub zip_code: Option<String>,
    pub best_canvass_response: Option<CanvassResponse>,
    pub last_canvass_response: Option<CanvassResponse>,
}

/// Person resource side-loaded with a visit request.
///
/// Every attribute is optional; absent and `null` both mean "keep".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonPayload {
    pub id: Option<PersonId>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub canvass_response: Option<CanvassResponse>,
    pub party_affiliation: Option<PartyAffiliation>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub preferred_contact_method: Option<PreferredContactMethod>,
    pub previously_participated_in_caucus_or_primary: Option<bool>,
}

/// A "record a visit" request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisitRequest {
    pub duration_sec: i64,
    pub submitted_latitude: Option<f64>,
    pub submitted_longitude: Option<f64>,
    pub submitted_street_1: Option<String>,
    pub address: Option<AddressPayload>,
    pub people: Vec<PersonPayload>,
}

/// Result of a successful ingestion, returned before leaderboards update
#[derive(Debug, Clone, Serialize)]
pub struct IngestedVisit {
    pub visit: Visit,
    pub score: Score,
    pub address: Address,
    /// Residents of the resolved address
    pub people: Vec<Person>,
    pub person_updates: Vec<PersonUpdate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_support_rank_orders_scale() {
        let scale = [
            CanvassResponse::StronglyFor,
            CanvassResponse::LeaningFor,
            CanvassResponse::Undecided,
            CanvassResponse::LeaningAgainst,
            CanvassResponse::StronglyAgainst,
        ];
        for pair in scale.windows(2) {
            assert!(pair[0].support_rank() > pair[1].support_rank());
        }
    }

    #[test]
    fn test_operational_statuses_are_unranked() {
        for status in [
            CanvassResponse::Unknown,
            CanvassResponse::NotHome,
            CanvassResponse::NotYetVisited,
            CanvassResponse::AskedToLeave,
        ] {
            assert!(status.is_operational());
            assert_eq!(status.support_rank(), None);
        }
    }

    #[test]
    fn test_enum_names_match_wire_format() {
        assert_eq!(
            "democrat_affiliation".parse::<PartyAffiliation>().unwrap(),
            PartyAffiliation::Democrat
        );
        assert_eq!(
            serde_json::to_string(&PartyAffiliation::Republican).unwrap(),
            "\"republican_affiliation\""
        );
        assert_eq!(
            serde_json::from_str::<CanvassResponse>("\"leaning_for\"").unwrap(),
            CanvassResponse::LeaningFor
        );
        assert!("maybe".parse::<CanvassResponse>().is_err());
    }

    #[test]
    fn test_person_payload_nulls_deserialize_as_absent() {
        let payload: PersonPayload = serde_json::from_str(
            r#"{"first_name": "John", "email": null, "previously_participated_in_caucus_or_primary": null}"#,
        )
        .unwrap();
        assert_eq!(payload.first_name.as_deref(), Some("John"));
        assert_eq!(payload.email, None);
        assert_eq!(payload.previously_participated_in_caucus_or_primary, None);
    }
}
