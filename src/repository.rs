use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{GroundGameError, Result};
use crate::models::{
    Address, AddressId, Coordinates, Person, PersonId, PersonUpdate, Ranking, RankingScope, Score,
    ScoreId, User, UserId, Visit, VisitId,
};

/// Everything a single ingestion writes, persisted as one unit.
#[derive(Debug, Clone)]
pub struct VisitChangeSet {
    pub visit: Visit,
    pub address: Address,
    /// `lock_version` the address had when it was read, `None` for a new address
    pub expected_address_version: Option<u32>,
    pub people: Vec<Person>,
    pub person_updates: Vec<PersonUpdate>,
    pub score: Score,
    /// Previous addresses of residents who moved, recomputed over the people
    /// left behind. Each is compared against its own `lock_version`.
    pub vacated: Vec<Address>,
}

/// Access to canvassing records.
#[async_trait]
pub trait CanvassRepository: Send + Sync {
    async fn find_address(&self, id: AddressId) -> Result<Option<Address>>;
    async fn find_address_at(&self, coordinates: Coordinates) -> Result<Option<Address>>;
    async fn find_address_by_street(&self, street_1: &str) -> Result<Option<Address>>;
    async fn find_person(&self, id: PersonId) -> Result<Option<Person>>;
    async fn residents_of(&self, address_id: AddressId) -> Result<Vec<Person>>;
    async fn find_visit(&self, id: VisitId) -> Result<Option<Visit>>;
    async fn find_score(&self, id: ScoreId) -> Result<Option<Score>>;
    async fn person_updates_for_visit(&self, visit_id: VisitId) -> Result<Vec<PersonUpdate>>;

    /// Persist a visit and everything it touched atomically.
    ///
    /// Fails with [`GroundGameError::ConcurrentAddressConflict`] without
    /// writing anything when the stored address version no longer matches
    /// `expected_address_version`, or when a vacated address no longer
    /// matches its `lock_version`. On success every written address carries
    /// `lock_version + 1`.
    async fn commit_visit(&self, changes: VisitChangeSet) -> Result<()>;
}

/// Access to volunteers and leaderboard projections.
#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    async fn find_user(&self, id: UserId) -> Result<Option<User>>;
    async fn save_user(&self, user: &User) -> Result<()>;
    async fn users(&self) -> Result<Vec<User>>;
    async fn add_friendship(&self, a: UserId, b: UserId) -> Result<()>;
    async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>>;
    /// Sum of `total_points` over all visits owned by the user
    async fn sum_visit_points(&self, user_id: UserId) -> Result<i64>;
    async fn set_total_points(&self, user_id: UserId, points: i64) -> Result<()>;
    /// Replace every row of a scope with the given rows
    async fn replace_rankings(&self, scope: &RankingScope, rows: Vec<Ranking>) -> Result<()>;
    async fn rankings(&self, scope: &RankingScope) -> Result<Vec<Ranking>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    addresses: HashMap<AddressId, Address>,
    people: HashMap<PersonId, Person>,
    visits: HashMap<VisitId, Visit>,
    scores: HashMap<ScoreId, Score>,
    person_updates: Vec<PersonUpdate>,
    users: HashMap<UserId, User>,
    friendships: HashSet<(UserId, UserId)>,
    rankings: HashMap<RankingScope, Vec<Ranking>>,
}

/// Process-local repository used by tests and embedded setups
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an address as-is, bypassing visit ingestion
    pub async fn insert_address(&self, address: Address) {
        self.state.write().await.addresses.insert(address.id, address);
    }

    /// Insert a person as-is, bypassing visit ingestion
    pub async fn insert_person(&self, person: Person) {
        self.state.write().await.people.insert(person.id, person);
    }

    pub async fn count_people(&self) -> usize {
        self.state.read().await.people.len()
    }

    pub async fn count_addresses(&self) -> usize {
        self.state.read().await.addresses.len()
    }

    pub async fn count_visits(&self) -> usize {
        self.state.read().await.visits.len()
    }
}

#[async_trait]
impl CanvassRepository for InMemoryRepository {
    async fn find_address(&self, id: AddressId) -> Result<Option<Address>> {
        Ok(self.state.read().await.addresses.get(&id).cloned())
    }

    #[allow(clippy::float_cmp)]
    async fn find_address_at(&self, coordinates: Coordinates) -> Result<Option<Address>> {
        let state = self.state.read().await;
        Ok(state
            .addresses
            .values()
            .filter(|a| a.latitude == coordinates.latitude && a.longitude == coordinates.longitude)
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn find_address_by_street(&self, street_1: &str) -> Result<Option<Address>> {
        let state = self.state.read().await;
        Ok(state
            .addresses
            .values()
            .filter(|a| a.street_1.as_deref() == Some(street_1))
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn find_person(&self, id: PersonId) -> Result<Option<Person>> {
        Ok(self.state.read().await.people.get(&id).cloned())
    }

    async fn residents_of(&self, address_id: AddressId) -> Result<Vec<Person>> {
        let state = self.state.read().await;
        let mut residents: Vec<Person> = state
            .people
            .values()
            .filter(|p| p.address_id == address_id)
            .cloned()
            .collect();
        residents.sort_by_key(|p| (p.updated_at, p.id));
        Ok(residents)
    }

    async fn find_visit(&self, id: VisitId) -> Result<Option<Visit>> {
        Ok(self.state.read().await.visits.get(&id).cloned())
    }

    async fn find_score(&self, id: ScoreId) -> Result<Option<Score>> {
        Ok(self.state.read().await.scores.get(&id).copied())
    }

    async fn person_updates_for_visit(&self, visit_id: VisitId) -> Result<Vec<PersonUpdate>> {
        let state = self.state.read().await;
        Ok(state
            .person_updates
            .iter()
            .filter(|u| u.visit_id == visit_id)
            .cloned()
            .collect())
    }

    async fn commit_visit(&self, changes: VisitChangeSet) -> Result<()> {
        let mut state = self.state.write().await;

        let stored_version = state.addresses.get(&changes.address.id).map(|a| a.lock_version);
        if stored_version != changes.expected_address_version {
            return Err(GroundGameError::ConcurrentAddressConflict {
                address_id: changes.address.id.to_string(),
            });
        }

        for vacated in &changes.vacated {
            let stored = state.addresses.get(&vacated.id).map(|a| a.lock_version);
            if stored != Some(vacated.lock_version) {
                return Err(GroundGameError::ConcurrentAddressConflict {
                    address_id: vacated.id.to_string(),
                });
            }
        }

        let mut address = changes.address;
        address.lock_version = stored_version.map_or(0, |v| v + 1);
        state.addresses.insert(address.id, address);
        for mut vacated in changes.vacated {
            vacated.lock_version += 1;
            state.addresses.insert(vacated.id, vacated);
        }
        for person in changes.people {
            state.people.insert(person.id, person);
        }
        state.person_updates.extend(changes.person_updates);
        state.visits.insert(changes.visit.id, changes.visit);
        state.scores.insert(changes.score.id, changes.score);
        Ok(())
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryRepository {
    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.state.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn users(&self) -> Result<Vec<User>> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn add_friendship(&self, a: UserId, b: UserId) -> Result<()> {
        if a == b {
            return Err(GroundGameError::invalid("friendship", "friend", "can't befriend yourself"));
        }
        let pair = if a < b { (a, b) } else { (b, a) };
        self.state.write().await.friendships.insert(pair);
        Ok(())
    }

    async fn friend_ids(&self, user_id: UserId) -> Result<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .friendships
            .iter()
            .filter_map(|&(a, b)| {
                if a == user_id {
                    Some(b)
                } else if b == user_id {
                    Some(a)
                } else {
                    None
                }
            })
            .collect())
    }

    async fn sum_visit_points(&self, user_id: UserId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .visits
            .values()
            .filter(|v| v.user_id == user_id)
            .map(|v| v.total_points)
            .sum())
    }

    async fn set_total_points(&self, user_id: UserId, points: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| GroundGameError::not_found("user", user_id))?;
        user.total_points = points;
        Ok(())
    }

    async fn replace_rankings(&self, scope: &RankingScope, rows: Vec<Ranking>) -> Result<()> {
        self.state.write().await.rankings.insert(scope.clone(), rows);
        Ok(())
    }

    async fn rankings(&self, scope: &RankingScope) -> Result<Vec<Ranking>> {
        let state = self.state.read().await;
        let mut rows = state.rankings.get(scope).cloned().unwrap_or_default();
        rows.sort_by_key(|r| r.rank);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DraftVisit, ScoreId};
    use chrono::Utc;

    fn change_set(address: Address, expected: Option<u32>) -> VisitChangeSet {
        let now = Utc::now();
        let draft = DraftVisit {
            id: VisitId::new(),
            user_id: UserId::new(),
            submitted: address.coordinates(),
            submitted_street_1: None,
            duration_sec: 10,
            created_at: now,
        };
        let visit = draft.complete(address.coordinates(), address.id, 5);
        VisitChangeSet {
            score: Score {
                id: ScoreId::new(),
                visit_id: visit.id,
                points_for_knock: 5,
                points_for_updates: 0,
            },
            visit,
            address,
            expected_address_version: expected,
            people: Vec::new(),
            person_updates: Vec::new(),
            vacated: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_bumps_lock_version() {
        let repo = InMemoryRepository::new();
        let address = Address::new(Coordinates::new(1.0, 2.0), None, Utc::now());
        let id = address.id;

        repo.commit_visit(change_set(address.clone(), None)).await.unwrap();
        assert_eq!(repo.find_address(id).await.unwrap().unwrap().lock_version, 0);

        repo.commit_visit(change_set(address, Some(0))).await.unwrap();
        assert_eq!(repo.find_address(id).await.unwrap().unwrap().lock_version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_writes_nothing() {
        let repo = InMemoryRepository::new();
        let address = Address::new(Coordinates::new(1.0, 2.0), None, Utc::now());
        repo.insert_address(address.clone()).await;

        let result = repo.commit_visit(change_set(address, Some(7))).await;
        assert!(matches!(
            result,
            Err(GroundGameError::ConcurrentAddressConflict { .. })
        ));
        assert_eq!(repo.count_visits().await, 0);
    }

    #[tokio::test]
    async fn test_stale_vacated_address_writes_nothing() {
        let repo = InMemoryRepository::new();
        let mut old = Address::new(Coordinates::new(3.0, 4.0), None, Utc::now());
        old.lock_version = 2;
        repo.insert_address(old.clone()).await;

        let address = Address::new(Coordinates::new(1.0, 2.0), None, Utc::now());
        let mut stale = change_set(address.clone(), None);
        stale.vacated = vec![Address { lock_version: 1, ..old.clone() }];
        assert!(repo.commit_visit(stale).await.is_err());
        assert!(repo.find_address(address.id).await.unwrap().is_none());

        let mut fresh = change_set(address, None);
        fresh.vacated = vec![old.clone()];
        repo.commit_visit(fresh).await.unwrap();
        assert_eq!(repo.find_address(old.id).await.unwrap().unwrap().lock_version, 3);
    }

    #[tokio::test]
    async fn test_friendship_is_symmetric() {
        let repo = InMemoryRepository::new();
        let (a, b) = (UserId::new(), UserId::new());
        repo.add_friendship(b, a).await.unwrap();
        assert_eq!(repo.friend_ids(a).await.unwrap(), vec![b]);
        assert_eq!(repo.friend_ids(b).await.unwrap(), vec![a]);
        assert!(repo.add_friendship(a, a).await.is_err());
    }
}
