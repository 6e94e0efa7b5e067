//! Bounded-concurrency execution of all figure requests of a report.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::Semaphore;

use super::{FigureArtifact, FigureRunner};
use crate::extract::ExtractedTable;
use crate::synth::FigureRequest;

/// Runs every request with at most `concurrency` scripts in flight.
///
/// Each request gets its own directory `<fig_root>/<id>`. The returned map
/// holds one artifact per request id. `progress(done, total)` is called
/// after each request finishes.
pub async fn execute_all<F>(
    runner: &dyn FigureRunner,
    requests: &[FigureRequest],
    tables: &[ExtractedTable],
    fig_root: &Path,
    concurrency: usize,
    progress: F,
) -> BTreeMap<String, FigureArtifact>
where
    F: Fn(usize, usize) + Send + Sync,
{
    let total = requests.len();
    let semaphore = Semaphore::new(concurrency.max(1));
    let done = AtomicUsize::new(0);

    let futures = requests.iter().map(|request| {
        let semaphore = &semaphore;
        let done = &done;
        let progress = &progress;
        async move {
            let artifact = match semaphore.acquire().await {
                Ok(_permit) => {
                    let workdir = fig_root.join(&request.id);
                    tracing::debug!(figure_id = %request.id, "Running figure script");
                    runner.run(request, tables, &workdir).await
                }
                Err(_) => FigureArtifact::failed(&request.id, "figure worker aborted"),
            };
            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            progress(finished, total);
            artifact
        }
    });

    let mut artifacts = BTreeMap::new();
    for artifact in join_all(futures).await {
        artifacts.insert(artifact.request_id.clone(), artifact);
    }

    for request in requests {
        artifacts
            .entry(request.id.clone())
            .or_insert_with(|| FigureArtifact::failed(&request.id, "figure worker aborted"));
    }

    let failed = artifacts.values().filter(|a| a.is_failed()).count();
    tracing::info!(total, failed, "Figure rendering finished");
    artifacts
}
