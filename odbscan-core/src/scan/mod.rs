//! Concurrent object discovery and classification
//!
//! [`ObjectDatabase::stream_objects_of_type`] wires up the pipeline:
//!
//! ```text
//!  loose walker ───────────────┐
//!  pack locator ─> pack worker ├─> id merge ─> classifier ┬─> result merge ─> caller
//!               └> pack worker ┘            └> classifier ┘
//! ```
//!
//! Every stage holds a clone of the shared error sender and reports at most
//! one error before stopping. The result merger is the terminal stage: it
//! joins every other stage before closing both the result and error streams.

pub mod classify;
pub mod loose;
pub mod merge;
pub mod pack;

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database::ObjectDatabase;
use crate::error::Error;
use crate::object::{constructor_for, AnyObject, ObjectId, ObjectKind};

/// Receiver drained by a pool of workers
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Output of [`ObjectDatabase::stream_objects_of_type`].
///
/// Read `objects` until it closes, then read `errors` until it closes to
/// learn whether any stage stopped early.
#[derive(Debug)]
pub struct ObjectStream {
    pub objects: mpsc::Receiver<AnyObject>,
    pub errors: mpsc::Receiver<Error>,
}

impl ObjectStream {
    /// Read every object, then every error
    pub async fn drain(mut self) -> (Vec<AnyObject>, Vec<Error>) {
        let mut objects = Vec::new();
        while let Some(object) = self.objects.recv().await {
            objects.push(object);
        }
        let mut errors = Vec::new();
        while let Some(error) = self.errors.recv().await {
            errors.push(error);
        }
        (objects, errors)
    }
}

/// A spawned pipeline stage, named for error reports
#[derive(Debug)]
pub struct Stage {
    pub name: &'static str,
    pub handle: JoinHandle<()>,
}

impl Stage {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

impl ObjectDatabase {
    /// Stream every object of `kind` in the store, uninstantiated.
    ///
    /// Loose objects and pack indexes are scanned concurrently; results
    /// arrive in no particular order. Cancelling `cancel` stops every stage
    /// without reporting an error. Dropping [`ObjectStream::objects`] also
    /// stops the pipeline.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stream_objects_of_type(&self, cancel: CancellationToken, kind: ObjectKind) -> ObjectStream {
        let construct = constructor_for(kind);
        let config = self.config().clone();
        let capacity = config.channel_capacity;
        // Cancelled by the pipeline itself when the caller stops reading
        let cancel = cancel.child_token();

        tracing::debug!(
            git_dir = %self.git_dir().display(),
            %kind,
            pack_workers = config.pack_workers,
            classifier_workers = config.classifier_workers,
            "starting object scan"
        );

        let (error_tx, error_rx) = mpsc::channel(config.error_capacity());
        let mut stages = Vec::new();

        let (loose_tx, loose_rx) = mpsc::channel(capacity);
        stages.push(Stage::new(
            "loose walker",
            loose::find_loose_objects(self.objects_dir(), loose_tx, error_tx.clone(), cancel.clone()),
        ));

        let (pack_path_tx, pack_path_rx) = mpsc::channel(capacity);
        stages.push(Stage::new(
            "pack locator",
            pack::find_pack_indexes(self.pack_dir(), pack_path_tx, cancel.clone()),
        ));

        let pack_paths: SharedReceiver<_> = Arc::new(Mutex::new(pack_path_rx));
        let mut id_streams = vec![loose_rx];
        for _ in 0..config.pack_workers {
            let (id_tx, id_rx) = mpsc::channel(capacity);
            id_streams.push(id_rx);
            let worker = pack::list_pack_objects(
                Arc::clone(self.runner()),
                Arc::clone(&pack_paths),
                id_tx,
                error_tx.clone(),
                cancel.clone(),
            );
            stages.push(Stage::new("pack worker", tokio::spawn(worker)));
        }

        let (merged_tx, merged_rx) = mpsc::channel::<ObjectId>(capacity);
        for handle in merge::merge_streams(id_streams, merged_tx, cancel.clone()) {
            stages.push(Stage::new("id merge", handle));
        }

        let ids: SharedReceiver<_> = Arc::new(Mutex::new(merged_rx));
        let mut classified = Vec::with_capacity(config.classifier_workers);
        for _ in 0..config.classifier_workers {
            let (object_tx, object_rx) = mpsc::channel(capacity);
            classified.push(object_rx);
            let worker = classify::classify_objects(
                self.clone(),
                kind,
                construct,
                Arc::clone(&ids),
                object_tx,
                error_tx.clone(),
                cancel.clone(),
            );
            stages.push(Stage::new("classifier", tokio::spawn(worker)));
        }

        let (result_tx, result_rx) = mpsc::channel(capacity);
        // The result merger owns the last error sender
        tokio::spawn(merge::merge_results(classified, result_tx, error_tx, stages, cancel));

        ObjectStream {
            objects: result_rx,
            errors: error_rx,
        }
    }
}

/// Send `value` unless `cancel` fires first. Returns false if cancelled or
/// the receiver is gone.
pub(crate) async fn send_or_cancel<T>(tx: &mpsc::Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(value) => sent.is_ok(),
    }
}

/// Take the next value from a worker pool's shared receiver, or `None` once
/// it is closed or `cancel` fires
pub(crate) async fn recv_or_cancel<T>(rx: &SharedReceiver<T>, cancel: &CancellationToken) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = async { rx.lock().await.recv().await } => value,
    }
}

/// Hand an error to the caller without waiting.
///
/// The error channel has a slot for every stage, so this only fails when
/// the caller has dropped the error stream.
pub(crate) fn report(errors: &mpsc::Sender<Error>, error: Error) {
    tracing::warn!(%error, "pipeline stage stopped");
    if errors.try_send(error).is_err() {
        tracing::debug!("error stream closed, error dropped");
    }
}
