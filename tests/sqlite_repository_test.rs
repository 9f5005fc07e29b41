use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use ground_game::config::{AppConfig, DatabaseConfig};
use ground_game::db::{Database, SqliteRepository};
use ground_game::geocoder::FixtureGeocoder;
use ground_game::leaderboard::{LeaderboardAggregator, RankingQuery};
use ground_game::models::{
    Address, AddressPayload, CanvassResponse, Coordinates, PartyAffiliation, Person, PersonPayload,
    RankingScope, User, UserId, VisitRequest,
};
use ground_game::queue::ChannelTaskQueue;
use ground_game::repository::{CanvassRepository, LeaderboardRepository};
use ground_game::service::VisitService;

const SUBMITTED: Coordinates = Coordinates::new(44.97, -93.26);
const CORRECTED: Coordinates = Coordinates::new(44.9778, -93.265);

fn open(dir: &TempDir) -> Database {
    let config = DatabaseConfig {
        url: dir.path().join("db").join("ground_game.db").display().to_string(),
        max_connections: 4,
        connection_timeout_secs: 5,
    };
    Database::new(&config).expect("Failed to create database")
}

fn request(people: Vec<PersonPayload>) -> VisitRequest {
    VisitRequest {
        duration_sec: 90,
        submitted_latitude: Some(SUBMITTED.latitude),
        submitted_longitude: Some(SUBMITTED.longitude),
        submitted_street_1: Some("Hennepin Ave".into()),
        address: Some(AddressPayload {
            city: Some("Minneapolis".into()),
            state_code: Some("MN".into()),
            ..AddressPayload::default()
        }),
        people,
    }
}

#[tokio::test]
async fn test_ingest_and_aggregate_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir);
    let repo = SqliteRepository::shared(&database);

    let user = User::new("volunteer@mail.com", Some("MN".into()));
    repo.save_user(&user).await.unwrap();

    let config = AppConfig::default();
    let aggregator = Arc::new(LeaderboardAggregator::new(repo.clone(), repo.clone()));
    let queue = Arc::new(ChannelTaskQueue::spawn_worker(aggregator, config.queue));
    let geocoder = Arc::new(FixtureGeocoder::default().with_reverse(SUBMITTED, CORRECTED));
    let service = VisitService::new(repo.clone(), repo.clone(), geocoder, queue.clone(), &config);

    let first = service
        .ingest(
            &request(vec![PersonPayload {
                first_name: Some("Ana".into()),
                canvass_response: Some(CanvassResponse::LeaningFor),
                party_affiliation: Some(PartyAffiliation::Independent),
                ..PersonPayload::default()
            }]),
            user.id,
        )
        .await
        .unwrap();
    let ana = first.people[0].id;

    let second = service
        .ingest(
            &request(vec![PersonPayload {
                id: Some(ana),
                canvass_response: Some(CanvassResponse::StronglyFor),
                ..PersonPayload::default()
            }]),
            user.id,
        )
        .await
        .unwrap();
    queue.shutdown().await.unwrap();

    assert_eq!(second.address.id, first.address.id);
    assert_eq!(second.score.points_for_updates, 2);

    let address = repo.find_address(first.address.id).await.unwrap().unwrap();
    assert_eq!(address.lock_version, 1);
    assert_eq!(address.city.as_deref(), Some("Minneapolis"));
    assert_eq!(address.best_canvass_response, CanvassResponse::StronglyFor);
    assert_eq!(address.most_supportive_resident_id, Some(ana));

    let person = repo.find_person(ana).await.unwrap().unwrap();
    assert_eq!(person.first_name.as_deref(), Some("Ana"));
    assert_eq!(person.party_affiliation, PartyAffiliation::Independent);

    let updates = repo.person_updates_for_visit(second.visit.id).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].old_canvass_response, Some(CanvassResponse::LeaningFor));

    let stored_user = repo.find_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored_user.total_points, 5 + 7);

    let query = RankingQuery::new(repo.clone(), 25);
    let state = query.for_state(user.id, "MN").await.unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].score, 12);
    assert_eq!(query.for_friends(user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_commit_is_rejected_atomically() {
    let dir = TempDir::new().unwrap();
    let database = open(&dir);
    let repo = SqliteRepository::new(&database);

    let user = User::new("volunteer@mail.com", None);
    repo.save_user(&user).await.unwrap();

    let address = Address::new(CORRECTED, None, Utc::now());
    let person = Person::new(address.id, Utc::now());
    let draft = ground_game::models::DraftVisit {
        id: ground_game::models::VisitId::new(),
        user_id: user.id,
        submitted: SUBMITTED,
        submitted_street_1: None,
        duration_sec: 10,
        created_at: Utc::now(),
    };
    let changes = |expected: Option<u32>| {
        let visit_id = ground_game::models::VisitId::new();
        let visit = ground_game::models::DraftVisit { id: visit_id, ..draft.clone() }.complete(CORRECTED, address.id, 5);
        ground_game::repository::VisitChangeSet {
            score: ground_game::models::Score {
                id: ground_game::models::ScoreId::new(),
                visit_id,
                points_for_knock: 5,
                points_for_updates: 0,
            },
            visit,
            address: address.clone(),
            expected_address_version: expected,
            people: vec![person.clone()],
            person_updates: Vec::new(),
            vacated: Vec::new(),
        }
    };

    repo.commit_visit(changes(None)).await.unwrap();
    assert!(repo.commit_visit(changes(None)).await.is_err());
    repo.commit_visit(changes(Some(0))).await.unwrap();

    let err = repo.commit_visit(changes(Some(0))).await.unwrap_err();
    assert_eq!(err.error_id(), "CONCURRENT_UPDATE");

    assert_eq!(repo.sum_visit_points(user.id).await.unwrap(), 10);
    assert_eq!(repo.find_address(address.id).await.unwrap().unwrap().lock_version, 1);
    assert_eq!(repo.residents_of(address.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_friendships_and_rankings_persist() {
    let dir = TempDir::new().unwrap();
    let repo = SqliteRepository::new(&open(&dir));

    let a = User::new("a@mail.com", Some("NY".into()));
    let b = User::new("b@mail.com", Some("NY".into()));
    repo.save_user(&a).await.unwrap();
    repo.save_user(&b).await.unwrap();

    repo.add_friendship(b.id, a.id).await.unwrap();
    repo.add_friendship(a.id, b.id).await.unwrap();
    assert_eq!(repo.friend_ids(a.id).await.unwrap(), vec![b.id]);
    assert_eq!(repo.friend_ids(b.id).await.unwrap(), vec![a.id]);
    assert!(repo.add_friendship(a.id, a.id).await.is_err());

    let scope = RankingScope::Friends(a.id);
    let rows = ground_game::leaderboard::rank_users(&scope, repo.users().await.unwrap());
    repo.replace_rankings(&scope, rows.clone()).await.unwrap();
    repo.replace_rankings(&scope, rows.clone()).await.unwrap();
    assert_eq!(repo.rankings(&scope).await.unwrap(), rows);
    assert!(repo.rankings(&RankingScope::Everyone).await.unwrap().is_empty());

    let err = repo.set_total_points(UserId::new(), 3).await.unwrap_err();
    assert_eq!(err.error_id(), "RECORD_NOT_FOUND");
}
