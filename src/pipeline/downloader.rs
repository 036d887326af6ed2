//! Download worker pool: descriptor -> published file.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::parser::DownloadJob;
use super::{SharedReceiver, WorkerContext, next_job, record_failure};
use crate::catalog::DownloadDescriptor;
use crate::download::{FetchError, PublishedFile, download_to_path};
use crate::progress::ItemStatus;

pub(crate) struct DownloaderContext {
    pub shared: WorkerContext,
    pub downloads_dir: PathBuf,
}

/// Spawns `count` download workers pulling from `input`.
pub(crate) fn spawn_downloaders(
    count: usize,
    input: &SharedReceiver<DownloadJob>,
    ctx: &Arc<DownloaderContext>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let input = Arc::clone(input);
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move { download_worker(worker, input, ctx).await })
        })
        .collect()
}

async fn download_worker(
    worker: usize,
    input: SharedReceiver<DownloadJob>,
    ctx: Arc<DownloaderContext>,
) {
    debug!(worker, "download worker started");
    while let Some(job) = next_job(&input, &ctx.shared.cancel).await {
        handle_job(&ctx, job).await;
    }
    debug!(worker, "download worker finished");
}

async fn handle_job(ctx: &DownloaderContext, job: DownloadJob) {
    let DownloadJob { descriptor, ticket } = job;
    let shared = &ctx.shared;
    shared.stats.increment_download_attempted();

    let published = match fetch_payload(ctx, &descriptor).await {
        Ok(published) => published,
        Err(error) => {
            record_failure(shared, &descriptor.item_id, "download", &error).await;
            return;
        }
    };

    match shared
        .progress
        .mark(&descriptor.item_id, ItemStatus::Downloaded)
        .await
    {
        Ok(_) => {
            shared.stats.increment_downloaded();
            info!(
                item_id = %descriptor.item_id,
                path = %published.path.display(),
                bytes = published.bytes,
                chunk = ticket.chunk_index(),
                "item downloaded"
            );
        }
        Err(e) => {
            shared.stats.increment_unrecorded();
            error!(
                item_id = %descriptor.item_id,
                error = %e,
                "payload saved but progress not recorded, will be fetched again next run"
            );
        }
    }
}

#[instrument(skip(ctx, descriptor), fields(item_id = %descriptor.item_id))]
async fn fetch_payload(
    ctx: &DownloaderContext,
    descriptor: &DownloadDescriptor,
) -> Result<PublishedFile, FetchError> {
    let final_path = ctx.downloads_dir.join(&descriptor.suggested_filename);
    ctx.shared
        .fetcher
        .run("payload", |lease, attempt| {
            let url = descriptor.target_for_attempt(attempt).to_string();
            let path = final_path.clone();
            let hint = descriptor.content_type_hint.clone();
            async move { download_to_path(lease.client(), &url, &path, &hint).await }
        })
        .await
}
