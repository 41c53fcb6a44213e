use crate::types::{Credential, CredentialId, Egress};
use itertools::Itertools;

/// Picks the selectable credential with the lowest usage, oldest registration
/// breaking ties.
#[must_use]
pub fn best_credential<'a, I>(candidates: I, excluded: &[CredentialId]) -> Option<&'a Credential>
where
    I: IntoIterator<Item = &'a Credential>,
{
    candidates
        .into_iter()
        .filter(|credential| credential.health.is_selectable())
        .filter(|credential| !excluded.contains(&credential.id))
        .min_by_key(|credential| (credential.usage_count, credential.registered_at, credential.id))
}

/// Picks the egress bound to the fewest credentials, lowest id breaking ties.
#[must_use]
pub fn least_bound_egress<'a>(
    egresses: &'a [Egress],
    credentials: &[Credential],
) -> Option<&'a Egress> {
    let bindings = credentials
        .iter()
        .filter_map(|credential| credential.egress_id)
        .counts();

    egresses
        .iter()
        .min_by_key(|egress| (bindings.get(&egress.id).copied().unwrap_or(0), egress.id))
}

#[cfg(test)]
mod tests {
    use super::{best_credential, least_bound_egress};
    use crate::types::{Credential, CredentialHealth, CredentialId, Egress, EgressId, EgressKind};
    use chrono::{Duration, TimeZone, Utc};

    fn credential(id: i64, usage: u64, health: CredentialHealth, age_rank: i64) -> Credential {
        Credential {
            id: CredentialId::new(id),
            login: format!("+7900000{id}"),
            health,
            usage_count: usage,
            egress_id: None,
            registered_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
                + Duration::minutes(age_rank),
        }
    }

    fn egress(id: i64) -> Egress {
        Egress {
            id: EgressId::new(id),
            kind: EgressKind::Http,
            address: format!("10.0.0.{id}"),
            port: 3128,
            username: None,
            secret: None,
        }
    }

    #[test]
    fn given_two_active_credentials_when_selecting_then_least_used_wins() {
        let pool = [
            credential(2, 5, CredentialHealth::Active, 0),
            credential(1, 0, CredentialHealth::Active, 1),
        ];
        let picked = best_credential(&pool, &[]).map(|c| c.id);
        assert_eq!(picked, Some(CredentialId::new(1)));
    }

    #[test]
    fn given_equal_usage_when_selecting_then_oldest_registration_wins() {
        let pool = [
            credential(1, 3, CredentialHealth::Active, 10),
            credential(2, 3, CredentialHealth::Active, 2),
        ];
        assert_eq!(
            best_credential(&pool, &[]).map(|c| c.id),
            Some(CredentialId::new(2))
        );
    }

    #[test]
    fn given_unhealthy_members_when_selecting_then_they_are_never_returned() {
        let pool = [
            credential(1, 0, CredentialHealth::Banned, 0),
            credential(2, 0, CredentialHealth::Errored, 1),
            credential(3, 9, CredentialHealth::Active, 2),
        ];
        assert_eq!(
            best_credential(&pool, &[]).map(|c| c.id),
            Some(CredentialId::new(3))
        );
        assert!(best_credential(&pool[..2], &[]).is_none());
    }

    #[test]
    fn given_excluded_credential_when_selecting_then_next_best_is_returned() {
        let pool = [
            credential(1, 0, CredentialHealth::Active, 0),
            credential(2, 1, CredentialHealth::Active, 1),
        ];
        assert_eq!(
            best_credential(&pool, &[CredentialId::new(1)]).map(|c| c.id),
            Some(CredentialId::new(2))
        );
    }

    #[test]
    fn given_bindings_when_assigning_then_least_bound_egress_wins() {
        let egresses = [egress(1), egress(2), egress(3)];
        let mut a = credential(1, 0, CredentialHealth::Active, 0);
        a.egress_id = Some(EgressId::new(1));
        let mut b = credential(2, 0, CredentialHealth::Banned, 1);
        b.egress_id = Some(EgressId::new(2));

        let picked = least_bound_egress(&egresses, &[a, b]).map(|e| e.id);
        assert_eq!(picked, Some(EgressId::new(3)));
    }

    #[test]
    fn given_tied_bindings_when_assigning_then_insertion_order_wins() {
        let egresses = [egress(4), egress(2)];
        assert_eq!(
            least_bound_egress(&egresses, &[]).map(|e| e.id),
            Some(EgressId::new(2))
        );
        assert!(least_bound_egress(&[], &[]).is_none());
    }
}
