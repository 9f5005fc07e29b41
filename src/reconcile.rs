//! Non-destructive merging of partial person attributes.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Address, NewPersonUpdate, Person, PersonPayload, PersonUpdate, UpdateType, VisitId};
use crate::validation::InputValidator;

/// Outcome of reconciling one side-loaded person
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub person: Person,
    /// Present when the canvass response or party affiliation was supplied
    /// and differs from the stored value, or the person is new
    pub update: Option<PersonUpdate>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersonReconciler;

impl PersonReconciler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Merge `incoming` into `existing` (or a new person) living at `address`.
    ///
    /// Attributes that are absent or null in `incoming` keep their stored
    /// value.
    pub fn reconcile(
        &self,
        existing: Option<Person>,
        incoming: &PersonPayload,
        address: &Address,
        visit_id: VisitId,
        now: DateTime<Utc>,
    ) -> Result<Reconciled> {
        let update_type = if existing.is_some() {
            UpdateType::Modified
        } else {
            UpdateType::Created
        };
        let mut person = existing.unwrap_or_else(|| Person::new(address.id, now));

        let old_canvass_response = person.canvass_response;
        let old_party_affiliation = person.party_affiliation;

        merge(&mut person, incoming);
        person.address_id = address.id;
        person.updated_at = now;

        let response_changed = incoming
            .canvass_response
            .is_some_and(|r| update_type == UpdateType::Created || r != old_canvass_response);
        let affiliation_changed = incoming
            .party_affiliation
            .is_some_and(|a| update_type == UpdateType::Created || a != old_party_affiliation);

        let update = if response_changed || affiliation_changed {
            let (old_response, old_affiliation) = match update_type {
                UpdateType::Created => (None, None),
                UpdateType::Modified => (Some(old_canvass_response), Some(old_party_affiliation)),
            };
            let draft = NewPersonUpdate {
                person_id: Some(person.id),
                visit_id: Some(visit_id),
                update_type: Some(update_type),
                old_canvass_response: old_response,
                new_canvass_response: Some(person.canvass_response),
                old_party_affiliation: old_affiliation,
                new_party_affiliation: Some(person.party_affiliation),
            };
            Some(draft.validate(now)?)
        } else {
            None
        };

        Ok(Reconciled { person, update })
    }
}

fn merge(person: &mut Person, incoming: &PersonPayload) {
    if let Some(first_name) = InputValidator::sanitize_optional(incoming.first_name.as_ref()) {
        person.first_name = Some(first_name);
    }
    if let Some(last_name) = InputValidator::sanitize_optional(incoming.last_name.as_ref()) {
        person.last_name = Some(last_name);
    }
    if let Some(response) = incoming.canvass_response {
        person.canvass_response = response;
    }
    if let Some(affiliation) = incoming.party_affiliation {
        person.party_affiliation = affiliation;
    }
    if let Some(email) = InputValidator::sanitize_optional(incoming.email.as_ref()) {
        person.email = Some(email);
    }
    if let Some(phone) = InputValidator::sanitize_optional(incoming.phone.as_ref()) {
        person.phone = Some(phone);
    }
    if let Some(method) = incoming.preferred_contact_method {
        person.preferred_contact_method = Some(method);
    }
    if let Some(participated) = incoming.previously_participated_in_caucus_or_primary {
        person.previously_participated_in_caucus_or_primary = participated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanvassResponse, Coordinates, PartyAffiliation, PreferredContactMethod};

    fn stored(address: &Address) -> Person {
        let mut person = Person::new(address.id, Utc::now());
        person.first_name = Some("John".into());
        person.email = Some("john@doe.com".into());
        person.phone = Some("555-555-1212".into());
        person.preferred_contact_method = Some(PreferredContactMethod::Phone);
        person
    }

    fn address() -> Address {
        Address::new(Coordinates::new(2.0, 3.0), Some("Test street".into()), Utc::now())
    }

    #[test]
    fn test_nulls_keep_stored_values() {
        let address = address();
        let existing = stored(&address);
        let incoming = PersonPayload {
            id: Some(existing.id),
            canvass_response: Some(CanvassResponse::LeaningFor),
            party_affiliation: Some(PartyAffiliation::Democrat),
            ..PersonPayload::default()
        };

        let result = PersonReconciler::new()
            .reconcile(Some(existing.clone()), &incoming, &address, VisitId::new(), Utc::now())
            .unwrap();

        assert_eq!(result.person.email, existing.email);
        assert_eq!(result.person.phone, existing.phone);
        assert_eq!(result.person.preferred_contact_method, Some(PreferredContactMethod::Phone));
        assert!(!result.person.previously_participated_in_caucus_or_primary);
        assert_eq!(result.person.canvass_response, CanvassResponse::LeaningFor);
        assert_eq!(result.person.party_affiliation, PartyAffiliation::Democrat);
    }

    #[test]
    fn test_modified_update_records_old_and_new() {
        let address = address();
        let existing = stored(&address);
        let incoming = PersonPayload {
            canvass_response: Some(CanvassResponse::StronglyFor),
            ..PersonPayload::default()
        };
        let visit_id = VisitId::new();

        let update = PersonReconciler::new()
            .reconcile(Some(existing.clone()), &incoming, &address, visit_id, Utc::now())
            .unwrap()
            .update
            .unwrap();

        assert_eq!(update.update_type, UpdateType::Modified);
        assert_eq!(update.person_id, existing.id);
        assert_eq!(update.visit_id, visit_id);
        assert_eq!(update.old_canvass_response, Some(CanvassResponse::Unknown));
        assert_eq!(update.new_canvass_response, CanvassResponse::StronglyFor);
        assert_eq!(update.old_party_affiliation, Some(PartyAffiliation::Unknown));
        assert_eq!(update.new_party_affiliation, PartyAffiliation::Unknown);
    }

    #[test]
    fn test_contact_only_change_is_not_audited() {
        let address = address();
        let existing = stored(&address);
        let incoming = PersonPayload {
            email: Some("new@doe.com".into()),
            canvass_response: Some(CanvassResponse::Unknown),
            ..PersonPayload::default()
        };

        let result = PersonReconciler::new()
            .reconcile(Some(existing), &incoming, &address, VisitId::new(), Utc::now())
            .unwrap();

        assert_eq!(result.person.email.as_deref(), Some("new@doe.com"));
        assert!(result.update.is_none());
    }

    #[test]
    fn test_new_person_is_created_at_address() {
        let address = address();
        let incoming = PersonPayload {
            first_name: Some("Jane".into()),
            canvass_response: Some(CanvassResponse::StronglyFor),
            ..PersonPayload::default()
        };

        let result = PersonReconciler::new()
            .reconcile(None, &incoming, &address, VisitId::new(), Utc::now())
            .unwrap();

        assert_eq!(result.person.address_id, address.id);
        let update = result.update.unwrap();
        assert_eq!(update.update_type, UpdateType::Created);
        assert_eq!(update.old_canvass_response, None);
        assert_eq!(update.old_party_affiliation, None);
        assert_eq!(update.new_party_affiliation, PartyAffiliation::Unknown);
    }
}
