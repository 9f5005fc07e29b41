//! The "record a visit" operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, IngestionConfig};
use crate::error::{GroundGameError, Result};
use crate::geocoder::Geocoder;
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{
    Address, AddressId, AddressPayload, Coordinates, DraftVisit, IngestedVisit, Person, UserId, VisitId,
    VisitRequest,
};
use crate::queue::TaskQueue;
use crate::rank::{DirectStatus, ResponseRankEngine};
use crate::reconcile::{PersonReconciler, Reconciled};
use crate::repository::{CanvassRepository, LeaderboardRepository, VisitChangeSet};
use crate::resolver::AddressResolver;
use crate::score::ScoreCalculator;
use crate::validation::InputValidator;

/// Composes address resolution, person reconciliation, ranking and scoring
/// into one atomic ingestion.
pub struct VisitService {
    canvass: Arc<dyn CanvassRepository>,
    boards: Arc<dyn LeaderboardRepository>,
    resolver: AddressResolver,
    reconciler: PersonReconciler,
    ranker: ResponseRankEngine,
    calculator: ScoreCalculator,
    queue: Arc<dyn TaskQueue>,
    retry: IngestionConfig,
    metrics: MetricsCollector,
}

/// A change set plus the residents it leaves at the address
struct Prepared {
    changes: VisitChangeSet,
    residents: Vec<Person>,
}

impl VisitService {
    pub fn new(
        canvass: Arc<dyn CanvassRepository>,
        boards: Arc<dyn LeaderboardRepository>,
        geocoder: Arc<dyn Geocoder>,
        queue: Arc<dyn TaskQueue>,
        config: &AppConfig,
    ) -> Self {
        Self {
            resolver: AddressResolver::new(Arc::clone(&canvass), geocoder),
            canvass,
            boards,
            reconciler: PersonReconciler::new(),
            ranker: ResponseRankEngine::new(),
            calculator: ScoreCalculator::new(config.scoring),
            queue,
            retry: config.ingestion,
            metrics: MetricsCollector::default(),
        }
    }

    /// Record a visit made by `acting_user`.
    ///
    /// Either the visit, its address, every reconciled person, their audit
    /// records and the score are all persisted, or nothing is. Leaderboard
    /// aggregation is enqueued after the commit and not awaited.
    pub async fn ingest(&self, request: &VisitRequest, acting_user: UserId) -> Result<IngestedVisit> {
        let started = Instant::now();
        let result = self.ingest_visit(request, acting_user).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.error_id(),
        };
        self.metrics.record_visit_ingested(outcome, started.elapsed());
        result
    }

    async fn ingest_visit(&self, request: &VisitRequest, acting_user: UserId) -> Result<IngestedVisit> {
        let timer = OperationTimer::new("ingest_visit");
        let duration_sec = InputValidator::validate_visit_request(request)?;

        self.boards
            .find_user(acting_user)
            .await?
            .ok_or_else(|| GroundGameError::not_found("user", acting_user))?;

        let submitted = self.submitted_coordinates(request).await?;
        let draft = DraftVisit {
            id: VisitId::new(),
            user_id: acting_user,
            submitted,
            submitted_street_1: submitted_street(request),
            duration_sec,
            created_at: Utc::now(),
        };
        let corrected = self.resolver.correct_coordinates(submitted).await?;

        let mut attempt = 0;
        let prepared = loop {
            attempt += 1;
            let prepared = self.prepare(&draft, corrected, request).await?;
            match self.canvass.commit_visit(prepared.changes.clone()).await {
                Ok(()) => break prepared,
                Err(GroundGameError::ConcurrentAddressConflict { address_id })
                    if attempt <= self.retry.max_conflict_retries =>
                {
                    self.metrics.record_address_conflict(attempt);
                    let delay = self.conflict_backoff(attempt);
                    warn!(
                        visit_id = %draft.id,
                        address_id = %address_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Address changed during ingestion, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        let Prepared { changes, residents } = prepared;
        let mut address = changes.address;
        address.lock_version = changes.expected_address_version.map_or(0, |v| v + 1);

        self.metrics.record_points_awarded(changes.score.total());
        if let Err(err) = self.queue.enqueue(changes.score.id).await {
            self.metrics.record_enqueue_failure();
            error!(
                visit_id = %changes.visit.id,
                score_id = %changes.score.id,
                error = %err,
                "Failed to enqueue leaderboard aggregation"
            );
        }

        info!(
            visit_id = %changes.visit.id,
            user_id = %acting_user,
            address_id = %address.id,
            people = changes.people.len(),
            total_points = changes.visit.total_points,
            attempts = attempt,
            duration_ms = timer.finish(),
            "Visit ingested"
        );

        Ok(IngestedVisit {
            visit: changes.visit,
            score: changes.score,
            address,
            people: residents,
            person_updates: changes.person_updates,
        })
    }

    /// Device coordinates, else the address payload's, else the stored
    /// coordinates of the referenced address.
    async fn submitted_coordinates(&self, request: &VisitRequest) -> Result<Coordinates> {
        if let (Some(latitude), Some(longitude)) = (request.submitted_latitude, request.submitted_longitude) {
            return Ok(Coordinates::new(latitude, longitude));
        }
        let Some(payload) = &request.address else {
            return Err(GroundGameError::invalid("visit", "submitted_latitude", "can't be blank"));
        };
        if let (Some(latitude), Some(longitude)) = (payload.latitude, payload.longitude) {
            return Ok(Coordinates::new(latitude, longitude));
        }
        match payload.id {
            Some(id) => self
                .canvass
                .find_address(id)
                .await?
                .map(|a| a.coordinates())
                .ok_or_else(|| GroundGameError::not_found("address", id)),
            None => Err(GroundGameError::invalid("visit", "submitted_latitude", "can't be blank")),
        }
    }

    /// Resolve, merge and score against the current stored state.
    async fn prepare(&self, draft: &DraftVisit, corrected: Coordinates, request: &VisitRequest) -> Result<Prepared> {
        let now = Utc::now();
        let referenced = request.address.as_ref().and_then(|a| a.id);
        let resolved = self
            .resolver
            .locate(corrected, draft.submitted_street_1.as_deref(), referenced, now)
            .await?;
        let expected_address_version = resolved.expected_version();
        let is_new = resolved.is_new();
        let mut address = resolved.address;

        let mut needs_verification = is_new;
        if let Some(payload) = &request.address {
            needs_verification |= self.merge_address(&mut address, payload);
        }
        if needs_verification {
            self.resolver.verify(&mut address).await;
        }
        address.updated_at = now;

        let mut residents = if is_new {
            Vec::new()
        } else {
            self.canvass.residents_of(address.id).await?
        };
        let mut people: Vec<Person> = Vec::with_capacity(request.people.len());
        let mut person_updates = Vec::new();
        let mut moved_from: Vec<AddressId> = Vec::new();

        for payload in &request.people {
            let existing = match payload.id {
                Some(id) => match people.iter().find(|p| p.id == id) {
                    Some(touched) => Some(touched.clone()),
                    None => Some(
                        self.canvass
                            .find_person(id)
                            .await?
                            .ok_or_else(|| GroundGameError::not_found("person", id))?,
                    ),
                },
                None => None,
            };

            if let Some(previous) = existing.as_ref().map(|p| p.address_id) {
                if previous != address.id && !moved_from.contains(&previous) {
                    moved_from.push(previous);
                }
            }

            let Reconciled { person, update } = self.reconciler.reconcile(existing, payload, &address, draft.id, now)?;

            residents.retain(|p| p.id != person.id);
            residents.push(person.clone());
            self.ranker.recompute(&mut address, &residents, Some(&person));

            people.retain(|p| p.id != person.id);
            people.push(person);
            person_updates.extend(update);
        }

        let vacated = self.recompute_vacated(&moved_from, &people, now).await?;

        let score = self.calculator.score(draft.id, &person_updates);
        let visit = draft.complete(corrected, address.id, score.total());
        debug!(
            visit_id = %visit.id,
            address_id = %address.id,
            points_for_knock = score.points_for_knock,
            points_for_updates = score.points_for_updates,
            "Prepared visit change set"
        );

        Ok(Prepared {
            changes: VisitChangeSet {
                visit,
                address,
                expected_address_version,
                people,
                person_updates,
                score,
                vacated,
            },
            residents,
        })
    }

    /// Recompute the addresses that residents moved away from, over the
    /// people still living there.
    async fn recompute_vacated(
        &self,
        moved_from: &[AddressId],
        moved: &[Person],
        now: DateTime<Utc>,
    ) -> Result<Vec<Address>> {
        let mut vacated = Vec::with_capacity(moved_from.len());
        for &address_id in moved_from {
            let Some(mut previous) = self.canvass.find_address(address_id).await? else {
                continue;
            };
            let remaining: Vec<Person> = self
                .canvass
                .residents_of(address_id)
                .await?
                .into_iter()
                .filter(|p| moved.iter().all(|m| m.id != p.id))
                .collect();
            self.ranker.recompute(&mut previous, &remaining, None);
            previous.updated_at = now;
            debug!(
                address_id = %address_id,
                residents_left = remaining.len(),
                "Recomputed address a resident moved away from"
            );
            vacated.push(previous);
        }
        Ok(vacated)
    }

    /// Merge the side-loaded address attributes. Returns whether a postal
    /// field changed.
    fn merge_address(&self, address: &mut Address, payload: &AddressPayload) -> bool {
        let mut postal_changed = false;
        postal_changed |= merge_text(&mut address.street_1, payload.street_1.as_ref());
        postal_changed |= merge_text(&mut address.street_2, payload.street_2.as_ref());
        postal_changed |= merge_text(&mut address.city, payload.city.as_ref());
        postal_changed |= merge_text(&mut address.state_code, payload.state_code.as_ref());
        postal_changed |= merge_text(&mut address.zip_code, payload.zip_code.as_ref());

        if let (Some(latitude), Some(longitude)) = (payload.latitude, payload.longitude) {
            address.latitude = latitude;
            address.longitude = longitude;
        }

        if let Some(status) = payload.best_canvass_response {
            if self.ranker.apply_direct_status(address, status) == DirectStatus::Ignored {
                debug!(address_id = %address.id, "Ignored direct write of unknown status");
            }
        }
        if let Some(status) = payload.last_canvass_response {
            address.last_canvass_response = status;
        }
        postal_changed
    }

    /// Capped exponential backoff with +/- 20% jitter.
    fn conflict_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry
            .retry_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry.retry_cap_ms);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = (delay as f64 * rand::thread_rng().gen_range(0.8..1.2)).round() as u64;
        Duration::from_millis(jittered)
    }
}

fn submitted_street(request: &VisitRequest) -> Option<String> {
    InputValidator::sanitize_optional(request.submitted_street_1.as_ref()).or_else(|| {
        request
            .address
            .as_ref()
            .and_then(|a| InputValidator::sanitize_optional(a.street_1.as_ref()))
    })
}

fn merge_text(field: &mut Option<String>, incoming: Option<&String>) -> bool {
    match InputValidator::sanitize_optional(incoming) {
        Some(value) if field.as_deref() != Some(value.as_str()) => {
            *field = Some(value);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::geocoder::FixtureGeocoder;
    use crate::models::{
        AddressId, CanvassResponse, PersonId, PersonPayload, PersonUpdate, Score, ScoreId, User,
        Visit,
    };
    use crate::repository::InMemoryRepository;

    /// Reports a conflict for the first `conflicts` commits.
    struct Contended {
        inner: InMemoryRepository,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl CanvassRepository for Contended {
        async fn find_address(&self, id: AddressId) -> Result<Option<Address>> {
            self.inner.find_address(id).await
        }
        async fn find_address_at(&self, coordinates: Coordinates) -> Result<Option<Address>> {
            self.inner.find_address_at(coordinates).await
        }
        async fn find_address_by_street(&self, street_1: &str) -> Result<Option<Address>> {
            self.inner.find_address_by_street(street_1).await
        }
        async fn find_person(&self, id: PersonId) -> Result<Option<Person>> {
            self.inner.find_person(id).await
        }
        async fn residents_of(&self, address_id: AddressId) -> Result<Vec<Person>> {
            self.inner.residents_of(address_id).await
        }
        async fn find_visit(&self, id: VisitId) -> Result<Option<Visit>> {
            self.inner.find_visit(id).await
        }
        async fn find_score(&self, id: ScoreId) -> Result<Option<Score>> {
            self.inner.find_score(id).await
        }
        async fn person_updates_for_visit(&self, visit_id: VisitId) -> Result<Vec<PersonUpdate>> {
            self.inner.person_updates_for_visit(visit_id).await
        }
        async fn commit_visit(&self, changes: VisitChangeSet) -> Result<()> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(GroundGameError::ConcurrentAddressConflict {
                    address_id: changes.address.id.to_string(),
                });
            }
            self.inner.commit_visit(changes).await
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        fail: bool,
        enqueued: tokio::sync::Mutex<Vec<ScoreId>>,
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, score_id: ScoreId) -> Result<()> {
            if self.fail {
                return Err(GroundGameError::Queue("broker down".into()));
            }
            self.enqueued.lock().await.push(score_id);
            Ok(())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.ingestion.retry_base_ms = 1;
        config.ingestion.retry_cap_ms = 2;
        config
    }

    fn geocoder() -> Arc<FixtureGeocoder> {
        Arc::new(FixtureGeocoder::default().with_reverse(Coordinates::new(2.0, 3.0), Coordinates::new(2.5, 3.5)))
    }

    fn request() -> VisitRequest {
        VisitRequest {
            duration_sec: 200,
            submitted_latitude: Some(2.0),
            submitted_longitude: Some(3.0),
            people: vec![PersonPayload {
                first_name: Some("Jane".into()),
                canvass_response: Some(CanvassResponse::LeaningFor),
                ..PersonPayload::default()
            }],
            ..VisitRequest::default()
        }
    }

    async fn user(repo: &InMemoryRepository) -> UserId {
        let user = User::new("canvasser@mail.com", Some("NY".into()));
        repo.save_user(&user).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let repo = InMemoryRepository::new();
        let user_id = user(&repo).await;
        let canvass = Arc::new(Contended {
            inner: repo.clone(),
            conflicts: AtomicU32::new(2),
        });
        let queue = Arc::new(RecordingQueue::default());
        let service = VisitService::new(canvass, Arc::new(repo.clone()), geocoder(), queue.clone(), &config());

        let ingested = service.ingest(&request(), user_id).await.unwrap();

        assert_eq!(repo.count_visits().await, 1);
        assert_eq!(repo.count_people().await, 1);
        assert_eq!(ingested.visit.corrected_latitude, 2.5);
        assert_eq!(*queue.enqueued.lock().await, vec![ingested.score.id]);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_retries_exhausted() {
        let repo = InMemoryRepository::new();
        let user_id = user(&repo).await;
        let canvass = Arc::new(Contended {
            inner: repo.clone(),
            conflicts: AtomicU32::new(10),
        });
        let service = VisitService::new(
            canvass,
            Arc::new(repo.clone()),
            geocoder(),
            Arc::new(RecordingQueue::default()),
            &config(),
        );

        let err = service.ingest(&request(), user_id).await.unwrap_err();
        assert!(matches!(err, GroundGameError::ConcurrentAddressConflict { .. }));
        assert_eq!(repo.count_visits().await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_keeps_committed_visit() {
        let repo = InMemoryRepository::new();
        let user_id = user(&repo).await;
        let queue = Arc::new(RecordingQueue {
            fail: true,
            ..RecordingQueue::default()
        });
        let service = VisitService::new(Arc::new(repo.clone()), Arc::new(repo.clone()), geocoder(), queue, &config());

        let ingested = service.ingest(&request(), user_id).await.unwrap();
        assert_eq!(ingested.visit.total_points, 5);
        assert_eq!(repo.count_visits().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let repo = InMemoryRepository::new();
        let service = VisitService::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            geocoder(),
            Arc::new(RecordingQueue::default()),
            &config(),
        );
        let err = service.ingest(&request(), UserId::new()).await.unwrap_err();
        assert_eq!(err.error_id(), "RECORD_NOT_FOUND");
    }

    #[test]
    fn test_merge_text_ignores_blank_and_equal_values() {
        let mut field = Some("Broadway".to_string());
        assert!(!merge_text(&mut field, None));
        assert!(!merge_text(&mut field, Some(&"  ".to_string())));
        assert!(!merge_text(&mut field, Some(&"Broadway".to_string())));
        assert!(merge_text(&mut field, Some(&"5th Avenue".to_string())));
        assert_eq!(field.as_deref(), Some("5th Avenue"));
    }
}
