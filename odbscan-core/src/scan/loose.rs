//! Loose object discovery
//!
//! A loose object lives at `objects/<2 hex>/<38 hex>`. Anything else under
//! `objects/` (packs, `info/`, temporary files) is ignored.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::report;
use crate::error::Error;
use crate::object::ObjectId;

/// Id of the loose object stored at `path`, if the path has that shape
pub fn loose_object_id(path: &Path) -> Option<ObjectId> {
    let file = path.file_name()?.to_str()?;
    let dir = path.parent()?.file_name()?.to_str()?;
    ObjectId::from_loose_parts(dir, file)
}

/// Walk `objects_dir` on the blocking pool, sending every loose object id.
///
/// Cancellation is checked before each send and ends the walk quietly. A
/// filesystem error is reported once and ends the walk. `out` closes when
/// the returned task finishes.
pub fn find_loose_objects(
    objects_dir: PathBuf,
    out: mpsc::Sender<ObjectId>,
    errors: mpsc::Sender<Error>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut found = 0usize;

        for entry in WalkDir::new(&objects_dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report(&errors, Error::Walk(e));
                    return;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(id) = loose_object_id(entry.path()) else {
                continue;
            };

            if cancel.is_cancelled() {
                tracing::debug!(found, "loose object walk cancelled");
                return;
            }
            if out.blocking_send(id).is_err() {
                return;
            }
            found += 1;
        }

        tracing::debug!(dir = %objects_dir.display(), found, "loose object walk finished");
    })
}
