//! Packed object discovery
//!
//! The pack locator globs `objects/pack/pack-*.idx`; a pool of workers lists
//! each index through `show-index`, whose lines read
//! `<offset> <object id> (<crc>)`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{recv_or_cancel, report, send_or_cancel, SharedReceiver};
use crate::command::CommandRunner;
use crate::error::Error;
use crate::object::ObjectId;

/// Glob `pack_dir` on the blocking pool, sending the path of every pack
/// index in glob order.
///
/// A missing directory yields nothing. Entries that cannot be read while
/// globbing are skipped. Cancellation is checked before each send and ends
/// the search quietly.
pub fn find_pack_indexes(pack_dir: PathBuf, out: mpsc::Sender<PathBuf>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let escaped = glob::Pattern::escape(&pack_dir.to_string_lossy());
        let pattern = Path::new(&escaped).join("pack-*.idx");
        let pattern = pattern.to_string_lossy();

        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => panic!("pack index pattern {:?} is invalid: {}", pattern, e),
        };

        let mut found = 0usize;
        for path in paths {
            let path = match path {
                Ok(path) => path,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable pack index");
                    continue;
                }
            };
            if cancel.is_cancelled() || out.blocking_send(path).is_err() {
                return;
            }
            found += 1;
        }
        tracing::debug!(dir = %pack_dir.display(), found, "pack indexes located");
    })
}

/// Pack worker: list every index taken from `paths` and send the ids found.
///
/// A malformed line, or any failure running the lister, is reported once and
/// stops this worker. Other workers keep draining `paths`.
pub async fn list_pack_objects(
    runner: Arc<dyn CommandRunner>,
    paths: SharedReceiver<PathBuf>,
    out: mpsc::Sender<ObjectId>,
    errors: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    while let Some(path) = recv_or_cancel(&paths, &cancel).await {
        let mut lines = match runner.lines_with_input(&["show-index"], &path).await {
            Ok(lines) => lines,
            Err(e) => {
                report(&errors, e);
                return;
            }
        };

        let mut listed = 0usize;
        while let Some(line) = lines.next_line().await {
            let fields: Vec<&str> = line.split(' ').collect();
            if fields.len() != 3 {
                report(&errors, Error::PackIndexLine { path, line });
                return;
            }
            let id = match ObjectId::from_hex(fields[1]) {
                Ok(id) => id,
                Err(e) => {
                    report(&errors, e.context(format!("Listing pack index {}", path.display())));
                    return;
                }
            };
            if !send_or_cancel(&out, id, &cancel).await {
                return;
            }
            listed += 1;
        }

        if let Some(e) = Error::aggregate(lines.finish().await) {
            report(&errors, e.context(format!("Listing pack index {}", path.display())));
            return;
        }
        tracing::debug!(path = %path.display(), listed, "pack index listed");
    }
}
