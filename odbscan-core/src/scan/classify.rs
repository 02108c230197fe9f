//! Object classification workers

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{recv_or_cancel, report, send_or_cancel, SharedReceiver};
use crate::database::ObjectDatabase;
use crate::error::Error;
use crate::object::{AnyObject, Constructor, ObjectId, ObjectKind};

/// Classifier worker: query the kind of each id taken from `ids` and send an
/// uninstantiated object for every id of the wanted `kind`.
///
/// A failed kind query is reported and stops this worker only. A query still
/// running when `cancel` fires is abandoned.
pub async fn classify_objects(
    db: ObjectDatabase,
    kind: ObjectKind,
    construct: Constructor,
    ids: SharedReceiver<ObjectId>,
    out: mpsc::Sender<AnyObject>,
    errors: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut matched = 0usize;

    while let Some(id) = recv_or_cancel(&ids, &cancel).await {
        let actual = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            actual = db.object_kind(id) => actual,
        };
        let actual = match actual {
            Ok(actual) => actual,
            Err(e) => {
                report(&errors, e.context(format!("Getting object type for {}", id)));
                return;
            }
        };
        if actual != kind {
            continue;
        }

        if cancel.is_cancelled() {
            return;
        }
        if !send_or_cancel(&out, construct(id, db.tree_cache()), &cancel).await {
            return;
        }
        matched += 1;
    }

    tracing::trace!(%kind, matched, "classifier finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{constructor_for, Object};
    use crate::test_support::{id, MockRunner};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const COMMIT: &str = "cccccccccccccccccccccccccccccccccccccccc";
    const BLOB: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BROKEN: &str = "0000000000000000000000000000000000000bad";

    async fn classify(runner: MockRunner, input: &[&str], kind: ObjectKind) -> (Vec<AnyObject>, Vec<Error>) {
        let db = ObjectDatabase::for_tests(Arc::new(runner));
        let (id_tx, id_rx) = mpsc::channel(input.len().max(1));
        for hex in input {
            id_tx.send(id(hex)).await.unwrap();
        }
        drop(id_tx);

        let (out, mut out_rx) = mpsc::channel(1);
        let (errors, mut errors_rx) = mpsc::channel(1);
        let worker = tokio::spawn(classify_objects(
            db,
            kind,
            constructor_for(kind),
            Arc::new(Mutex::new(id_rx)),
            out,
            errors,
            CancellationToken::new(),
        ));

        let mut objects = Vec::new();
        while let Some(object) = out_rx.recv().await {
            objects.push(object);
        }
        worker.await.unwrap();
        let mut errs = Vec::new();
        while let Some(e) = errors_rx.recv().await {
            errs.push(e);
        }
        (objects, errs)
    }

    #[tokio::test]
    async fn test_filters_by_kind() {
        let runner = MockRunner::new().kinds(&[(COMMIT, "commit"), (BLOB, "blob")]);
        let (objects, errors) = classify(runner, &[BLOB, COMMIT, BLOB], ObjectKind::Commit).await;
        assert!(errors.is_empty());
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind(), ObjectKind::Commit);
        assert_eq!(objects[0].id(), id(COMMIT));
    }

    #[tokio::test]
    async fn test_query_failure_stops_worker() {
        let runner = MockRunner::new()
            .kinds(&[(COMMIT, "commit")])
            .fail(&["cat-file", "-t", BROKEN], "fatal: Not a valid object name");
        let (objects, errors) = classify(runner, &[BROKEN, COMMIT], ObjectKind::Commit).await;

        // The worker stopped at the first failure
        assert!(objects.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            format!(
                "Getting object type for {}: `mock cat-file -t {}` exited with exit code 128: fatal: Not a valid object name",
                BROKEN, BROKEN
            )
        );
    }
}
