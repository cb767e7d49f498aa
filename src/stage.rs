use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::storage::Storage;
use crate::transfer::TransferConnector;
use crate::types::SourceObject;
use crate::types::token::PipelineCancellationToken;

/// Shared context passed to each pipeline stage.
///
/// - The ObjectLister stage has no `receiver` (it's the pipeline entry point)
///   and writes listed objects to `sender`.
/// - ObjectRelayer workers have no `sender` (they are the pipeline exit) and
///   share one `receiver`.
///
/// Each stage takes ownership of a `Stage`, consuming it during pipeline construction.
pub struct Stage {
    pub config: Config,
    pub source: Storage,
    pub transfer: TransferConnector,
    pub receiver: Option<Receiver<SourceObject>>,
    pub sender: Option<Sender<SourceObject>>,
    pub cancellation_token: PipelineCancellationToken,
    pub has_warning: Arc<AtomicBool>,
}

impl Stage {
    pub fn new(
        config: Config,
        source: Storage,
        transfer: TransferConnector,
        receiver: Option<Receiver<SourceObject>>,
        sender: Option<Sender<SourceObject>>,
        cancellation_token: PipelineCancellationToken,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            source,
            transfer,
            receiver,
            sender,
            cancellation_token,
            has_warning,
        }
    }

    /// Set the warning flag to indicate a non-fatal issue occurred.
    pub fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}
