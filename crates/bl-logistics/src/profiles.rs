use bl_schemas::{LogisticsProfile, PrincipalId, ProcureResult, ProfileUpdate};
use bl_store::{LiveQuery, ProfileQuery, TxError, Versioned, WriteBatch};
use tracing::info;

use crate::ShipmentTracker;

impl ShipmentTracker {
    /// Merge `update` into the supplier's own profile, creating it on first use.
    pub async fn upsert_profile(
        &self,
        supplier: &PrincipalId,
        update: ProfileUpdate,
    ) -> ProcureResult<LogisticsProfile> {
        let profile = self
            .deps
            .retry
            .run("upsert_profile", |_| {
                let update = update.clone();
                async move {
                    let now = self.deps.clock.now();
                    let current = self.deps.store.get_profile(supplier).await?;
                    let version = current.as_ref().map(|v| v.version);
                    let mut profile = current
                        .map(Versioned::into_value)
                        .unwrap_or_else(|| LogisticsProfile::empty(supplier.clone(), now));
                    profile.merge(update, now);
                    let mut batch = WriteBatch::new();
                    batch.put(profile.clone(), version);
                    self.deps.store.commit(batch).await?;
                    Ok::<_, TxError>(profile)
                }
            })
            .await?;
        info!(supplier = %supplier, fleet_size = profile.fleet_size, "logistics profile saved");
        Ok(profile)
    }

    pub async fn profile(&self, supplier: &PrincipalId) -> ProcureResult<Option<LogisticsProfile>> {
        Ok(self
            .deps
            .store
            .get_profile(supplier)
            .await?
            .map(Versioned::into_value))
    }

    pub fn watch_profile(&self, supplier: &PrincipalId) -> LiveQuery<ProfileQuery> {
        LiveQuery::new(self.deps.store.clone(), ProfileQuery(supplier.clone()))
    }
}
