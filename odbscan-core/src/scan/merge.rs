//! Fan-in stages

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{report, send_or_cancel, Stage};
use crate::error::Error;
use crate::object::AnyObject;

/// Forward every value from `inputs` into `out`, one task per input.
///
/// Each task holds its own clone of `out`, so `out` closes once the last
/// input is drained. If the receiving end of `out` goes away, `cancel` is
/// triggered: nothing downstream can take more values.
pub fn merge_streams<T: Send + 'static>(
    inputs: Vec<mpsc::Receiver<T>>,
    out: mpsc::Sender<T>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    inputs
        .into_iter()
        .map(|mut input| {
            let out = out.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let value = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        value = input.recv() => value,
                    };
                    let Some(value) = value else { return };
                    if !send_or_cancel(&out, value, &cancel).await {
                        if out.is_closed() {
                            cancel.cancel();
                        }
                        return;
                    }
                }
            })
        })
        .collect()
}

/// Terminal stage: forward classifier output to the caller, then wait for
/// every `upstream` stage before closing `out` and `errors`.
///
/// A stage that panicked is reported as [`Error::StageAborted`]. `errors`
/// must be the last error sender alive once the upstream stages finish, so
/// the caller sees the error stream close exactly once, after everything
/// else has stopped.
pub async fn merge_results(
    inputs: Vec<mpsc::Receiver<AnyObject>>,
    out: mpsc::Sender<AnyObject>,
    errors: mpsc::Sender<Error>,
    upstream: Vec<Stage>,
    cancel: CancellationToken,
) {
    let forwarders = merge_streams(inputs, out.clone(), cancel);
    let stages = upstream
        .into_iter()
        .chain(forwarders.into_iter().map(|handle| Stage::new("result merge", handle)));

    for stage in stages {
        match stage.handle.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::warn!(stage = stage.name, %message, "pipeline stage panicked");
                report(
                    &errors,
                    Error::StageAborted {
                        stage: stage.name,
                        message,
                    },
                );
            }
            Err(e) => tracing::debug!(stage = stage.name, error = %e, "pipeline stage cancelled"),
        }
    }

    tracing::debug!("object scan finished");
    drop(out);
    drop(errors);
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic payload".to_string()
    }
}
