use anyhow::{Result, anyhow};
use tracing::debug;

use crate::stage::Stage;

/// Lists the source bucket for a relay pass.
///
/// A thin wrapper around the `Stage` that delegates to
/// `Storage::list_objects()`. Listed objects go to `stage.sender` in listing
/// order; the channel closes when the lister is dropped, which lets the
/// relayer workers drain and finish.
///
/// ```text
/// ObjectLister → ObjectRelayer workers (MPMC)
/// ```
pub struct ObjectLister {
    stage: Stage,
}

impl ObjectLister {
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    /// `max_keys` is the page size of each listing request, not a limit on
    /// the number of objects.
    pub async fn list_source(&self, max_keys: i32) -> Result<()> {
        debug!("list source objects has started.");

        let sender = self
            .stage
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("lister stage has no sender."))?;
        self.stage.source.list_objects(sender, max_keys).await?;

        debug!("list source objects has been completed.");
        Ok(())
    }
}
