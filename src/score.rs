use crate::config::ScoringConfig;
use crate::models::{PersonUpdate, Score, ScoreId, UpdateType, VisitId};

/// Turns a visit and its audit records into points.
#[derive(Debug, Clone, Copy)]
pub struct ScoreCalculator {
    table: ScoringConfig,
}

impl ScoreCalculator {
    #[must_use]
    pub const fn new(table: ScoringConfig) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn score(&self, visit_id: VisitId, person_updates: &[PersonUpdate]) -> Score {
        let points_for_updates = person_updates
            .iter()
            .filter(|u| u.visit_id == visit_id)
            .map(|u| self.points_for(u))
            .sum();

        Score {
            id: ScoreId::new(),
            visit_id,
            points_for_knock: self.table.points_for_knock,
            points_for_updates,
        }
    }

    fn points_for(&self, update: &PersonUpdate) -> i64 {
        match update.update_type {
            UpdateType::Created => self.table.new_resident,
            UpdateType::Modified => {
                let mut points = 0;
                if update.old_canvass_response != Some(update.new_canvass_response) {
                    points += self.table.canvass_response_change;
                }
                if update.old_party_affiliation != Some(update.new_party_affiliation) {
                    points += self.table.party_affiliation_change;
                }
                points
            }
        }
    }
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanvassResponse, PartyAffiliation, PersonId, PersonUpdateId};
    use chrono::Utc;

    fn update(
        visit_id: VisitId,
        update_type: UpdateType,
        old: Option<CanvassResponse>,
        new: CanvassResponse,
        old_party: Option<PartyAffiliation>,
        new_party: PartyAffiliation,
    ) -> PersonUpdate {
        PersonUpdate {
            id: PersonUpdateId::new(),
            person_id: PersonId::new(),
            visit_id,
            update_type,
            old_canvass_response: old,
            new_canvass_response: new,
            old_party_affiliation: old_party,
            new_party_affiliation: new_party,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_knock_only() {
        let visit_id = VisitId::new();
        let score = ScoreCalculator::default().score(visit_id, &[]);
        assert_eq!(score.points_for_knock, 5);
        assert_eq!(score.points_for_updates, 0);
        assert_eq!(score.visit_id, visit_id);
    }

    #[test]
    fn test_new_resident_earns_no_update_points() {
        let visit_id = VisitId::new();
        let created = update(
            visit_id,
            UpdateType::Created,
            None,
            CanvassResponse::LeaningFor,
            None,
            PartyAffiliation::Democrat,
        );
        let score = ScoreCalculator::default().score(visit_id, &[created]);
        assert_eq!(score.points_for_knock, 5);
        assert_eq!(score.points_for_updates, 0);
    }

    #[test]
    fn test_modified_fields_use_point_table() {
        let visit_id = VisitId::new();
        let both = update(
            visit_id,
            UpdateType::Modified,
            Some(CanvassResponse::Unknown),
            CanvassResponse::LeaningFor,
            Some(PartyAffiliation::Unknown),
            PartyAffiliation::Democrat,
        );
        let party_unchanged = update(
            visit_id,
            UpdateType::Modified,
            Some(CanvassResponse::LeaningFor),
            CanvassResponse::StronglyFor,
            Some(PartyAffiliation::Democrat),
            PartyAffiliation::Democrat,
        );
        let other_visit = update(
            VisitId::new(),
            UpdateType::Modified,
            Some(CanvassResponse::Unknown),
            CanvassResponse::StronglyFor,
            None,
            PartyAffiliation::Democrat,
        );

        let score = ScoreCalculator::default().score(visit_id, &[both, party_unchanged, other_visit]);
        assert_eq!(score.points_for_updates, 3 + 2);
        assert_eq!(score.total(), 10);
    }
}
