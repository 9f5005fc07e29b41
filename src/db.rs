use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{GroundGameError, Result};
use crate::models::{
    Address, AddressId, CanvassResponse, Coordinates, PartyAffiliation, Person, PersonId, PersonUpdate,
    PersonUpdateId, PreferredContactMethod, Ranking, RankingScope, Score, ScoreId, UpdateType, User,
    UserId, Visit, VisitId,
};
use crate::repository::{CanvassRepository, LeaderboardRepository, VisitChangeSet};
use crate::schema::{addresses, friendships, people, person_updates, rankings, scores, users, visits};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

macro_rules! sql_uuid {
    ($($name:ty),+ $(,)?) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

macro_rules! sql_enum {
    ($($name:ty),+ $(,)?) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|e: GroundGameError| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_uuid!(AddressId, PersonId, VisitId, ScoreId, PersonUpdateId, UserId);
sql_enum!(CanvassResponse, PartyAffiliation, PreferredContactMethod, UpdateType);

/// Database manager for handling connections and migrations
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if needed) the database described by `config`
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(&config.url).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(&config.url).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(Duration::from_secs(5))
        });
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)?;

        Self::from_pool(pool)
    }

    /// Private in-memory database. A single pooled connection keeps every
    /// caller on the same database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: DbPool) -> Result<Self> {
        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-03-02-000000_create_canvass_tables/up.sql"))?;
        conn.execute_batch(include_str!("../migrations/2026-03-02-000001_create_leaderboard_tables/up.sql"))?;
        debug!("Database migrations applied");
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }
}

/// rusqlite-backed implementation of both repositories
#[derive(Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(database: &Database) -> Self {
        Self { pool: database.pool() }
    }

    pub fn shared(database: &Database) -> Arc<Self> {
        Arc::new(Self::new(database))
    }

    /// Run blocking database work off the async runtime
    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut conn)
        })
        .await
        .map_err(|e| GroundGameError::Other(format!("database task failed: {e}")))?
    }
}

fn map_address(row: &Row<'_>) -> rusqlite::Result<Address> {
    Ok(Address {
        id: row.get(addresses::ID)?,
        latitude: row.get(addresses::LATITUDE)?,
        longitude: row.get(addresses::LONGITUDE)?,
        street_1: row.get(addresses::STREET_1)?,
        street_2: row.get(addresses::STREET_2)?,
        city: row.get(addresses::CITY)?,
        state_code: row.get(addresses::STATE_CODE)?,
        zip_code: row.get(addresses::ZIP_CODE)?,
        usps_verified_street_1: row.get(addresses::USPS_VERIFIED_STREET_1)?,
        usps_verified_street_2: row.get(addresses::USPS_VERIFIED_STREET_2)?,
        usps_verified_city: row.get(addresses::USPS_VERIFIED_CITY)?,
        usps_verified_state: row.get(addresses::USPS_VERIFIED_STATE)?,
        usps_verified_zip: row.get(addresses::USPS_VERIFIED_ZIP)?,
        best_canvass_response: row.get(addresses::BEST_CANVASS_RESPONSE)?,
        last_canvass_response: row.get(addresses::LAST_CANVASS_RESPONSE)?,
        most_supportive_resident_id: row.get(addresses::MOST_SUPPORTIVE_RESIDENT_ID)?,
        lock_version: row.get(addresses::LOCK_VERSION)?,
        created_at: row.get(addresses::CREATED_AT)?,
        updated_at: row.get(addresses::UPDATED_AT)?,
    })
}

fn map_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(people::ID)?,
        address_id: row.get(people::ADDRESS_ID)?,
        first_name: row.get(people::FIRST_NAME)?,
        last_name: row.get(people::LAST_NAME)?,
        canvass_response: row.get(people::CANVASS_RESPONSE)?,
        party_affiliation: row.get(people::PARTY_AFFILIATION)?,
        email: row.get(people::EMAIL)?,
        phone: row.get(people::PHONE)?,
        preferred_contact_method: row.get(people::PREFERRED_CONTACT_METHOD)?,
        previously_participated_in_caucus_or_primary: row.get(people::PREVIOUSLY_PARTICIPATED)?,
        created_at: row.get(people::CREATED_AT)?,
        updated_at: row.get(people::UPDATED_AT)?,
    })
}

fn map_visit(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: row.get(visits::ID)?,
        user_id: row.get(visits::USER_ID)?,
        address_id: row.get(visits::ADDRESS_ID)?,
        submitted_latitude: row.get(visits::SUBMITTED_LATITUDE)?,
        submitted_longitude: row.get(visits::SUBMITTED_LONGITUDE)?,
        corrected_latitude: row.get(visits::CORRECTED_LATITUDE)?,
        corrected_longitude: row.get(visits::CORRECTED_LONGITUDE)?,
        submitted_street_1: row.get(visits::SUBMITTED_STREET_1)?,
        duration_sec: row.get(visits::DURATION_SEC)?,
        total_points: row.get(visits::TOTAL_POINTS)?,
        created_at: row.get(visits::CREATED_AT)?,
    })
}

fn map_score(row: &Row<'_>) -> rusqlite::Result<Score> {
    Ok(Score {
        id: row.get(scores::ID)?,
        visit_id: row.get(scores::VISIT_ID)?,
        points_for_knock: row.get(scores::POINTS_FOR_KNOCK)?,
        points_for_updates: row.get(scores::POINTS_FOR_UPDATES)?,
    })
}

fn map_person_update(row: &Row<'_>) -> rusqlite::Result<PersonUpdate> {
    Ok(PersonUpdate {
        id: row.get(person_updates::ID)?,
        person_id: row.get(person_updates::PERSON_ID)?,
        visit_id: row.get(person_updates::VISIT_ID)?,
        update_type: row.get(person_updates::UPDATE_TYPE)?,
        old_canvass_response: row.get(person_updates::OLD_CANVASS_RESPONSE)?,
        new_canvass_response: row.get(person_updates::NEW_CANVASS_RESPONSE)?,
        old_party_affiliation: row.get(person_updates::OLD_PARTY_AFFILIATION)?,
        new_party_affiliation: row.get(person_updates::NEW_PARTY_AFFILIATION)?,
        created_at: row.get(person_updates::CREATED_AT)?,
    })
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(users::ID)?,
        email: row.get(users::EMAIL)?,
        state_code: row.get(users::STATE_CODE)?,
        total_points: row.get(users::TOTAL_POINTS)?,
    })
}

fn map_ranking(row: &Row<'_>) -> rusqlite::Result<Ranking> {
    let kind: String = row.get(rankings::SCOPE_KIND)?;
    let subject: String = row.get(rankings::SCOPE_SUBJECT)?;
    let scope = match kind.as_str() {
        "everyone" => RankingScope::Everyone,
        "state" => RankingScope::State(subject),
        "friends" => RankingScope::Friends(
            subject
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?,
        ),
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown ranking scope '{other}'"),
                rusqlite::types::Type::Text,
            ))
        }
    };
    Ok(Ranking {
        scope,
        user_id: row.get(rankings::USER_ID)?,
        score: row.get(rankings::SCORE)?,
        rank: row.get(rankings::RANK)?,
    })
}

fn address_exists(conn: &Connection, id: AddressId) -> Result<bool> {
    Ok(conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)", addresses::TABLE, addresses::ID),
        params![id],
        |row| row.get(0),
    )?)
}

fn insert_address(conn: &Connection, address: &Address) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, 0, ?17, ?18)",
            addresses::TABLE,
            addresses::ID,
            addresses::LATITUDE,
            addresses::LONGITUDE,
            addresses::STREET_1,
            addresses::STREET_2,
            addresses::CITY,
            addresses::STATE_CODE,
            addresses::ZIP_CODE,
            addresses::USPS_VERIFIED_STREET_1,
            addresses::USPS_VERIFIED_STREET_2,
            addresses::USPS_VERIFIED_CITY,
            addresses::USPS_VERIFIED_STATE,
            addresses::USPS_VERIFIED_ZIP,
            addresses::BEST_CANVASS_RESPONSE,
            addresses::LAST_CANVASS_RESPONSE,
            addresses::MOST_SUPPORTIVE_RESIDENT_ID,
            addresses::LOCK_VERSION,
            addresses::CREATED_AT,
            addresses::UPDATED_AT,
        ),
        params![
            address.id,
            address.latitude,
            address.longitude,
            address.street_1,
            address.street_2,
            address.city,
            address.state_code,
            address.zip_code,
            address.usps_verified_street_1,
            address.usps_verified_street_2,
            address.usps_verified_city,
            address.usps_verified_state,
            address.usps_verified_zip,
            address.best_canvass_response,
            address.last_canvass_response,
            address.most_supportive_resident_id,
            address.created_at,
            address.updated_at,
        ],
    )?;
    Ok(())
}

/// Compare-and-swap update; returns whether the expected version matched.
fn update_address(conn: &Connection, address: &Address, expected_version: u32) -> Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET {} = ?2, {} = ?3, {} = ?4, {} = ?5, {} = ?6, {} = ?7, {} = ?8, {} = ?9, {} = ?10,
                {} = ?11, {} = ?12, {} = ?13, {} = ?14, {} = ?15, {} = ?16, {} = ?17, {} = {} + 1
             WHERE {} = ?1 AND {} = ?18",
            addresses::TABLE,
            addresses::LATITUDE,
            addresses::LONGITUDE,
            addresses::STREET_1,
            addresses::STREET_2,
            addresses::CITY,
            addresses::STATE_CODE,
            addresses::ZIP_CODE,
            addresses::USPS_VERIFIED_STREET_1,
            addresses::USPS_VERIFIED_STREET_2,
            addresses::USPS_VERIFIED_CITY,
            addresses::USPS_VERIFIED_STATE,
            addresses::USPS_VERIFIED_ZIP,
            addresses::BEST_CANVASS_RESPONSE,
            addresses::LAST_CANVASS_RESPONSE,
            addresses::MOST_SUPPORTIVE_RESIDENT_ID,
            addresses::UPDATED_AT,
            addresses::LOCK_VERSION,
            addresses::LOCK_VERSION,
            addresses::ID,
            addresses::LOCK_VERSION,
        ),
        params![
            address.id,
            address.latitude,
            address.longitude,
            address.street_1,
            address.street_2,
            address.city,
            address.state_code,
            address.zip_code,
            address.usps_verified_street_1,
            address.usps_verified_street_2,
            address.usps_verified_city,
            address.usps_verified_state,
            address.usps_verified_zip,
            address.best_canvass_response,
            address.last_canvass_response,
            address.most_supportive_resident_id,
            address.updated_at,
            expected_version,
        ],
    )?;
    Ok(changed == 1)
}

fn upsert_person(conn: &Connection, person: &Person) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} ({id}, {address_id}, {first_name}, {last_name}, {response}, {party}, {email}, {phone}, {contact}, {participated}, {created_at}, {updated_at})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT({id}) DO UPDATE SET
                {address_id} = excluded.{address_id},
                {first_name} = excluded.{first_name},
                {last_name} = excluded.{last_name},
                {response} = excluded.{response},
                {party} = excluded.{party},
                {email} = excluded.{email},
                {phone} = excluded.{phone},
                {contact} = excluded.{contact},
                {participated} = excluded.{participated},
                {updated_at} = excluded.{updated_at}",
            table = people::TABLE,
            id = people::ID,
            address_id = people::ADDRESS_ID,
            first_name = people::FIRST_NAME,
            last_name = people::LAST_NAME,
            response = people::CANVASS_RESPONSE,
            party = people::PARTY_AFFILIATION,
            email = people::EMAIL,
            phone = people::PHONE,
            contact = people::PREFERRED_CONTACT_METHOD,
            participated = people::PREVIOUSLY_PARTICIPATED,
            created_at = people::CREATED_AT,
            updated_at = people::UPDATED_AT,
        ),
        params![
            person.id,
            person.address_id,
            person.first_name,
            person.last_name,
            person.canvass_response,
            person.party_affiliation,
            person.email,
            person.phone,
            person.preferred_contact_method,
            person.previously_participated_in_caucus_or_primary,
            person.created_at,
            person.updated_at,
        ],
    )?;
    Ok(())
}

fn insert_visit(conn: &Connection, visit: &Visit) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            visits::TABLE,
            visits::ID,
            visits::USER_ID,
            visits::ADDRESS_ID,
            visits::SUBMITTED_LATITUDE,
            visits::SUBMITTED_LONGITUDE,
            visits::CORRECTED_LATITUDE,
            visits::CORRECTED_LONGITUDE,
            visits::SUBMITTED_STREET_1,
            visits::DURATION_SEC,
            visits::TOTAL_POINTS,
            visits::CREATED_AT,
        ),
        params![
            visit.id,
            visit.user_id,
            visit.address_id,
            visit.submitted_latitude,
            visit.submitted_longitude,
            visit.corrected_latitude,
            visit.corrected_longitude,
            visit.submitted_street_1,
            visit.duration_sec,
            visit.total_points,
            visit.created_at,
        ],
    )?;
    Ok(())
}

fn insert_person_update(conn: &Connection, update: &PersonUpdate) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            person_updates::TABLE,
            person_updates::ID,
            person_updates::PERSON_ID,
            person_updates::VISIT_ID,
            person_updates::UPDATE_TYPE,
            person_updates::OLD_CANVASS_RESPONSE,
            person_updates::NEW_CANVASS_RESPONSE,
            person_updates::OLD_PARTY_AFFILIATION,
            person_updates::NEW_PARTY_AFFILIATION,
            person_updates::CREATED_AT,
        ),
        params![
            update.id,
            update.person_id,
            update.visit_id,
            update.update_type,
            update.old_canvass_response,
            update.new_canvass_response,
            update.old_party_affiliation,
            update.new_party_affiliation,
            update.created_at,
        ],
    )?;
    Ok(())
}

fn insert_score(conn: &Connection, score: &Score) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4)",
            scores::TABLE,
            scores::ID,
            scores::VISIT_ID,
            scores::POINTS_FOR_KNOCK,
            scores::POINTS_FOR_UPDATES,
        ),
        params![score.id, score.visit_id, score.points_for_knock, score.points_for_updates],
    )?;
    Ok(())
}

#[async_trait]
impl CanvassRepository for SqliteRepository {
    async fn find_address(&self, id: AddressId) -> Result<Option<Address>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT * FROM {} WHERE {} = ?1", addresses::TABLE, addresses::ID),
                    params![id],
                    map_address,
                )
                .optional()?)
        })
        .await
    }

    async fn find_address_at(&self, coordinates: Coordinates) -> Result<Option<Address>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT * FROM {} WHERE {} = ?1 AND {} = ?2 ORDER BY {} LIMIT 1",
                        addresses::TABLE,
                        addresses::LATITUDE,
                        addresses::LONGITUDE,
                        addresses::CREATED_AT
                    ),
                    params![coordinates.latitude, coordinates.longitude],
                    map_address,
                )
                .optional()?)
        })
        .await
    }

    async fn find_address_by_street(&self, street_1: &str) -> Result<Option<Address>> {
        let street_1 = street_1.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT * FROM {} WHERE {} = ?1 ORDER BY {} LIMIT 1",
                        addresses::TABLE,
                        addresses::STREET_1,
                        addresses::CREATED_AT
                    ),
                    params![street_1],
                    map_address,
                )
                .optional()?)
        })
        .await
    }

    async fn find_person(&self, id: PersonId) -> Result<Option<Person>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT * FROM {} WHERE {} = ?1", people::TABLE, people::ID),
                    params![id],
                    map_person,
                )
                .optional()?)
        })
        .await
    }

    async fn residents_of(&self, address_id: AddressId) -> Result<Vec<Person>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} WHERE {} = ?1 ORDER BY {}, {}",
                people::TABLE,
                people::ADDRESS_ID,
                people::UPDATED_AT,
                people::ID
            ))?;
            let residents = stmt
                .query_map(params![address_id], map_person)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(residents)
        })
        .await
    }

    async fn find_visit(&self, id: VisitId) -> Result<Option<Visit>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT * FROM {} WHERE {} = ?1", visits::TABLE, visits::ID),
                    params![id],
                    map_visit,
                )
                .optional()?)
        })
        .await
    }

    async fn find_score(&self, id: ScoreId) -> Result<Option<Score>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT * FROM {} WHERE {} = ?1", scores::TABLE, scores::ID),
                    params![id],
                    map_score,
                )
                .optional()?)
        })
        .await
    }

    async fn person_updates_for_visit(&self, visit_id: VisitId) -> Result<Vec<PersonUpdate>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} WHERE {} = ?1 ORDER BY {}",
                person_updates::TABLE,
                person_updates::VISIT_ID,
                person_updates::CREATED_AT
            ))?;
            let updates = stmt
                .query_map(params![visit_id], map_person_update)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(updates)
        })
        .await
    }

    async fn commit_visit(&self, changes: VisitChangeSet) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let conflict = || GroundGameError::ConcurrentAddressConflict {
                address_id: changes.address.id.to_string(),
            };

            match changes.expected_address_version {
                None => {
                    if address_exists(&tx, changes.address.id)? {
                        return Err(conflict());
                    }
                    insert_address(&tx, &changes.address)?;
                }
                Some(version) => {
                    if !update_address(&tx, &changes.address, version)? {
                        return Err(conflict());
                    }
                }
            }
            for vacated in &changes.vacated {
                if !update_address(&tx, vacated, vacated.lock_version)? {
                    return Err(GroundGameError::ConcurrentAddressConflict {
                        address_id: vacated.id.to_string(),
                    });
                }
            }
            for person in &changes.people {
                upsert_person(&tx, person)?;
            }
            insert_visit(&tx, &changes.visit)?;
            for update in &changes.person_updates {
                insert_person_update(&tx, update)?;
            }
            insert_score(&tx, &changes.score)?;

            tx.commit()?;
            debug!(
                visit_id = %changes.visit.id,
                address_id = %changes.address.id,
                people = changes.people.len(),
                "Committed visit"
            );
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LeaderboardRepository for SqliteRepository {
    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT * FROM {} WHERE {} = ?1", users::TABLE, users::ID),
                    params![id],
                    map_user,
                )
                .optional()?)
        })
        .await
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} ({id}, {email}, {state}, {points}) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT({id}) DO UPDATE SET {email} = excluded.{email}, {state} = excluded.{state}, {points} = excluded.{points}",
                    table = users::TABLE,
                    id = users::ID,
                    email = users::EMAIL,
                    state = users::STATE_CODE,
                    points = users::TOTAL_POINTS,
                ),
                params![user.id, user.email, user.state_code, user.total_points],
            )?;
            info!(user_id = %user.id, email = %user.email, "Saved user");
            Ok(())
        })
        .await
    }

    async fn users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY {}", users::TABLE, users::ID))?;
            let users = stmt
                .query_map([], map_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn add_friendship(&self, a: UserId, b: UserId) -> Result<()> {
        if a == b {
            return Err(GroundGameError::invalid("friendship", "friend", "can't befriend yourself"));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
                    friendships::TABLE,
                    friendships::USER_A,
                    friendships::USER_B
                ),
                params![low, high],
            )?;
            Ok(())
        })
        .await
    }

    async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {b} FROM {table} WHERE {a} = ?1 UNION SELECT {a} FROM {table} WHERE {b} = ?1",
                table = friendships::TABLE,
                a = friendships::USER_A,
                b = friendships::USER_B,
            ))?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<UserId>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn sum_visit_points(&self, user_id: UserId) -> Result<i64> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM({}), 0) FROM {} WHERE {} = ?1",
                    visits::TOTAL_POINTS,
                    visits::TABLE,
                    visits::USER_ID
                ),
                params![user_id],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn set_total_points(&self, user_id: UserId, points: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!("UPDATE {} SET {} = ?2 WHERE {} = ?1", users::TABLE, users::TOTAL_POINTS, users::ID),
                params![user_id, points],
            )?;
            if changed == 0 {
                return Err(GroundGameError::not_found("user", user_id));
            }
            Ok(())
        })
        .await
    }

    async fn replace_rankings(&self, scope: &RankingScope, rows: Vec<Ranking>) -> Result<()> {
        let kind = scope.kind();
        let subject = scope.subject();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                    rankings::TABLE,
                    rankings::SCOPE_KIND,
                    rankings::SCOPE_SUBJECT
                ),
                params![kind, subject],
            )?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rankings::TABLE,
                    rankings::SCOPE_KIND,
                    rankings::SCOPE_SUBJECT,
                    rankings::USER_ID,
                    rankings::SCORE,
                    rankings::RANK
                ))?;
                for row in &rows {
                    stmt.execute(params![kind, subject, row.user_id, row.score, row.rank])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn rankings(&self, scope: &RankingScope) -> Result<Vec<Ranking>> {
        let kind = scope.kind();
        let subject = scope.subject();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM {} WHERE {} = ?1 AND {} = ?2 ORDER BY {}",
                rankings::TABLE,
                rankings::SCOPE_KIND,
                rankings::SCOPE_SUBJECT,
                rankings::RANK
            ))?;
            let rows = stmt
                .query_map(params![kind, subject], map_ranking)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let database = Database::in_memory().unwrap();
        let conn = database.get_connection().unwrap();
        Database::run_migrations(&conn).unwrap();
    }

    #[tokio::test]
    async fn test_address_round_trips_enums_and_ids() {
        let database = Database::in_memory().unwrap();
        let conn = database.get_connection().unwrap();
        let mut address = Address::new(Coordinates::new(40.0, -73.0), Some("5th Avenue".into()), Utc::now());
        address.best_canvass_response = CanvassResponse::NotHome;
        address.most_supportive_resident_id = Some(PersonId::new());
        insert_address(&conn, &address).unwrap();

        let stored = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?1", addresses::TABLE, addresses::ID),
                params![address.id],
                map_address,
            )
            .unwrap();
        assert_eq!(stored.id, address.id);
        assert_eq!(stored.street_1.as_deref(), Some("5th Avenue"));
        assert_eq!(stored.best_canvass_response, CanvassResponse::NotHome);
        assert_eq!(stored.last_canvass_response, CanvassResponse::NotYetVisited);
        assert_eq!(stored.most_supportive_resident_id, address.most_supportive_resident_id);
        assert_eq!(stored.lock_version, 0);
    }

    #[tokio::test]
    async fn test_stale_update_changes_nothing() {
        let database = Database::in_memory().unwrap();
        let conn = database.get_connection().unwrap();
        let mut address = Address::new(Coordinates::new(40.0, -73.0), None, Utc::now());
        insert_address(&conn, &address).unwrap();

        address.city = Some("NEW YORK".into());
        assert!(!update_address(&conn, &address, 3).unwrap());
        assert!(update_address(&conn, &address, 0).unwrap());
        assert!(!update_address(&conn, &address, 0).unwrap());
    }
}
