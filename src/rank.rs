//! Aggregate canvass status of an address, derived from its residents.

use tracing::{debug, warn};

use crate::models::{Address, CanvassResponse, Person};

/// Outcome of writing `best_canvass_response` directly onto an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectStatus {
    Applied,
    /// `unknown` carries no information and leaves the address untouched
    Ignored,
    /// Ranked values can only be derived from residents
    Rejected,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseRankEngine;

impl ResponseRankEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply a direct write of `best_canvass_response` from a request payload.
    pub fn apply_direct_status(&self, address: &mut Address, status: CanvassResponse) -> DirectStatus {
        match status {
            CanvassResponse::Unknown => DirectStatus::Ignored,
            s if s.is_operational() => {
                address.best_canvass_response = s;
                DirectStatus::Applied
            }
            s => {
                warn!(
                    address_id = %address.id,
                    status = %s,
                    "Rejected direct write of a ranked canvass response"
                );
                DirectStatus::Rejected
            }
        }
    }

    /// Recompute the derived status fields of `address`.
    ///
    /// `residents` are ordered oldest touch first; `touched` is the resident
    /// whose reconciliation triggered this recompute, if any. Among residents
    /// with equal rank the most recently updated one wins, then the later one
    /// in `residents`.
    pub fn recompute(&self, address: &mut Address, residents: &[Person], touched: Option<&Person>) {
        if let Some(person) = touched {
            address.last_canvass_response = person.canvass_response;
        }

        let best = residents
            .iter()
            .filter(|p| p.address_id == address.id)
            .filter_map(|p| p.canvass_response.support_rank().map(|rank| (rank, p)))
            .max_by(|(rank_a, a), (rank_b, b)| rank_a.cmp(rank_b).then(a.updated_at.cmp(&b.updated_at)));

        match best {
            Some((_, person)) => {
                address.best_canvass_response = person.canvass_response;
                address.most_supportive_resident_id = Some(person.id);
            }
            None => {
                // Operational statuses were set explicitly and stay. A ranked
                // value with no resident left holding it falls back to the
                // default.
                if address.best_canvass_response.support_rank().is_some() {
                    address.best_canvass_response = CanvassResponse::NotYetVisited;
                }
                address.most_supportive_resident_id = None;
            }
        }

        debug!(
            address_id = %address.id,
            best = %address.best_canvass_response,
            last = %address.last_canvass_response,
            "Recomputed address canvass status"
        );
    }
}
