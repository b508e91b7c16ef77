use std::collections::HashSet;

use blobyard_common::Digest;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::Stash;

impl Stash {
    /// Digests from `candidates` that the blobstore does not hold.
    ///
    /// Duplicates are checked once. The first storage error aborts the whole
    /// batch, so callers never see a partial answer.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn missing(&self, candidates: Vec<Digest>) -> Result<Vec<Digest>> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let unique: Vec<Digest> = candidates
            .into_iter()
            .filter(|digest| seen.insert(digest.clone()))
            .collect();

        let store = self.store.as_ref();
        let checked: Vec<(Digest, bool)> = stream::iter(unique)
            .map(move |digest| async move {
                let exists = store.exists(digest.as_str()).await?;
                Ok::<_, blobyard_store::StoreError>((digest, exists))
            })
            .buffered(self.config.match_concurrency.max(1))
            .try_collect()
            .await?;

        let missing: Vec<Digest> = checked
            .into_iter()
            .filter_map(|(digest, exists)| (!exists).then_some(digest))
            .collect();
        debug!(missing = missing.len(), "Matched fingerprints");
        Ok(missing)
    }
}
