use crate::error::Result;
use crate::store::CredentialStore;
use crate::types::{Credential, CredentialId, Egress};
use tracing::{debug, info};

/// Chooses the credential for the next attempt and makes sure it is routed
/// through an egress when any exist.
#[derive(Debug, Clone)]
pub struct PoolSelector<S> {
    store: S,
}

impl<S> PoolSelector<S>
where
    S: CredentialStore,
{
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// # Errors
    /// Propagates store failures.
    pub async fn select_credential(&self, excluded: &[CredentialId]) -> Result<Option<Credential>> {
        let picked = self.store.select_credential(excluded).await?;
        match &picked {
            Some(credential) => debug!(
                credential = %credential.id,
                usage = credential.usage_count,
                excluded = excluded.len(),
                "selected credential"
            ),
            None => debug!(excluded = excluded.len(), "no selectable credential left"),
        }
        Ok(picked)
    }

    /// Returns `None` when there is no egress at all; the credential then
    /// connects directly.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn assign_egress(&self, credential: &Credential) -> Result<Option<Egress>> {
        let egress = self.store.assign_egress(credential).await?;
        match (&egress, credential.egress_id) {
            (Some(egress), None) => info!(
                credential = %credential.id,
                egress = %egress.id,
                address = %egress.address,
                "bound egress to credential"
            ),
            (None, _) => debug!(credential = %credential.id, "no egress available, connecting directly"),
            (Some(_), Some(_)) => {}
        }
        Ok(egress)
    }
}
