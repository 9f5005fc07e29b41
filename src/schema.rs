//! Database schema definitions
//!
//! Table and column names used with rusqlite. The tables themselves are
//! created by the SQL files under `migrations/`.

/// Addresses table schema
pub mod addresses {
    pub const TABLE: &str = "addresses";
    pub const ID: &str = "id";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const STREET_1: &str = "street_1";
    pub const STREET_2: &str = "street_2";
    pub const CITY: &str = "city";
    pub const STATE_CODE: &str = "state_code";
    pub const ZIP_CODE: &str = "zip_code";
    pub const USPS_VERIFIED_STREET_1: &str = "usps_verified_street_1";
    pub const USPS_VERIFIED_STREET_2: &str = "usps_verified_street_2";
    pub const USPS_VERIFIED_CITY: &str = "usps_verified_city";
    pub const USPS_VERIFIED_STATE: &str = "usps_verified_state";
    pub const USPS_VERIFIED_ZIP: &str = "usps_verified_zip";
    pub const BEST_CANVASS_RESPONSE: &str = "best_canvass_response";
    pub const LAST_CANVASS_RESPONSE: &str = "last_canvass_response";
    /// Lookup-only, not a foreign key
    pub const MOST_SUPPORTIVE_RESIDENT_ID: &str = "most_supportive_resident_id";
    /// Optimistic concurrency token
    pub const LOCK_VERSION: &str = "lock_version";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// People table schema
pub mod people {
    pub const TABLE: &str = "people";
    pub const ID: &str = "id";
    /// Foreign key to addresses table
    pub const ADDRESS_ID: &str = "address_id";
    pub const FIRST_NAME: &str = "first_name";
    pub const LAST_NAME: &str = "last_name";
    pub const CANVASS_RESPONSE: &str = "canvass_response";
    pub const PARTY_AFFILIATION: &str = "party_affiliation";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const PREFERRED_CONTACT_METHOD: &str = "preferred_contact_method";
    pub const PREVIOUSLY_PARTICIPATED: &str = "previously_participated_in_caucus_or_primary";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// Visits table schema
pub mod visits {
    pub const TABLE: &str = "visits";
    pub const ID: &str = "id";
    /// Foreign key to users table
    pub const USER_ID: &str = "user_id";
    /// Foreign key to addresses table
    pub const ADDRESS_ID: &str = "address_id";
    pub const SUBMITTED_LATITUDE: &str = "submitted_latitude";
    pub const SUBMITTED_LONGITUDE: &str = "submitted_longitude";
    pub const CORRECTED_LATITUDE: &str = "corrected_latitude";
    pub const CORRECTED_LONGITUDE: &str = "corrected_longitude";
    pub const SUBMITTED_STREET_1: &str = "submitted_street_1";
    pub const DURATION_SEC: &str = "duration_sec";
    pub const TOTAL_POINTS: &str = "total_points";
    pub const CREATED_AT: &str = "created_at";
}

/// Scores table schema
pub mod scores {
    pub const TABLE: &str = "scores";
    pub const ID: &str = "id";
    /// Foreign key to visits table, unique
    pub const VISIT_ID: &str = "visit_id";
    pub const POINTS_FOR_KNOCK: &str = "points_for_knock";
    pub const POINTS_FOR_UPDATES: &str = "points_for_updates";
}

/// Person updates (audit trail) table schema
pub mod person_updates {
    pub const TABLE: &str = "person_updates";
    pub const ID: &str = "id";
    pub const PERSON_ID: &str = "person_id";
    pub const VISIT_ID: &str = "visit_id";
    pub const UPDATE_TYPE: &str = "update_type";
    pub const OLD_CANVASS_RESPONSE: &str = "old_canvass_response";
    pub const NEW_CANVASS_RESPONSE: &str = "new_canvass_response";
    pub const OLD_PARTY_AFFILIATION: &str = "old_party_affiliation";
    pub const NEW_PARTY_AFFILIATION: &str = "new_party_affiliation";
    pub const CREATED_AT: &str = "created_at";
}

/// Users table schema
pub mod users {
    pub const TABLE: &str = "users";
    pub const ID: &str = "id";
    pub const EMAIL: &str = "email";
    pub const STATE_CODE: &str = "state_code";
    /// Denormalized sum of visit points
    pub const TOTAL_POINTS: &str = "total_points";
}

/// Friendships table schema, one row per unordered pair
pub mod friendships {
    pub const TABLE: &str = "friendships";
    /// Lower of the two user ids
    pub const USER_A: &str = "user_a";
    /// Higher of the two user ids
    pub const USER_B: &str = "user_b";
}

/// Materialized leaderboard rows
pub mod rankings {
    pub const TABLE: &str = "rankings";
    /// everyone, state or friends
    pub const SCOPE_KIND: &str = "scope_kind";
    /// State code or owning user id, empty for everyone
    pub const SCOPE_SUBJECT: &str = "scope_subject";
    pub const USER_ID: &str = "user_id";
    pub const SCORE: &str = "score";
    pub const RANK: &str = "rank";
}
