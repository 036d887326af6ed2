//! Parser worker pool: detail page -> download descriptor.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::chunk::ItemTicket;
use super::{SharedReceiver, WorkerContext, next_job, record_failure};
use crate::catalog::{CatalogUrls, DetailPage, DownloadDescriptor, ExtractorSet, Item};
use crate::download::{FetchError, fetch_text};

/// An item waiting for its detail page.
#[derive(Debug)]
pub(crate) struct ParseJob {
    pub item: Item,
    pub ticket: ItemTicket,
}

/// A parsed item waiting for its payload.
#[derive(Debug)]
pub(crate) struct DownloadJob {
    pub descriptor: DownloadDescriptor,
    pub ticket: ItemTicket,
}

pub(crate) struct ParserContext {
    pub shared: WorkerContext,
    pub urls: CatalogUrls,
    pub extractors: ExtractorSet,
}

/// Spawns `count` parser workers pulling from `input` and feeding `output`.
pub(crate) fn spawn_parsers(
    count: usize,
    input: &SharedReceiver<ParseJob>,
    output: &mpsc::Sender<DownloadJob>,
    ctx: &Arc<ParserContext>,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker| {
            let input = Arc::clone(input);
            let output = output.clone();
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move { parser_worker(worker, input, output, ctx).await })
        })
        .collect()
}

async fn parser_worker(
    worker: usize,
    input: SharedReceiver<ParseJob>,
    output: mpsc::Sender<DownloadJob>,
    ctx: Arc<ParserContext>,
) {
    debug!(worker, "parser worker started");
    while let Some(job) = next_job(&input, &ctx.shared.cancel).await {
        ctx.shared.stats.parse_dequeued();
        handle_job(&ctx, &output, job).await;
    }
    debug!(worker, "parser worker finished");
}

async fn handle_job(ctx: &ParserContext, output: &mpsc::Sender<DownloadJob>, job: ParseJob) {
    let ParseJob { item, ticket } = job;
    let shared = &ctx.shared;
    shared.stats.increment_parse_attempted();

    let descriptor = match parse_item(ctx, &item).await {
        Ok(descriptor) => descriptor,
        Err(error) => {
            record_failure(shared, &item.id, "parse", &error).await;
            return;
        }
    };

    shared.stats.increment_parsed();
    info!(
        item_id = %item.id,
        kind = %descriptor.kind,
        targets = descriptor.targets.len(),
        chunk = ticket.chunk_index(),
        "item parsed"
    );

    let job = DownloadJob { descriptor, ticket };
    tokio::select! {
        biased;
        () = shared.cancel.cancelled() => {
            shared.stats.increment_unrecorded();
            debug!(item_id = %item.id, "shutdown before hand-off, left for next run");
        }
        sent = output.send(job) => {
            if sent.is_err() {
                shared.stats.increment_unrecorded();
                warn!(item_id = %item.id, "download queue closed, left for next run");
            }
        }
    }
}

#[instrument(skip(ctx, item), fields(item_id = %item.id))]
async fn parse_item(ctx: &ParserContext, item: &Item) -> Result<DownloadDescriptor, FetchError> {
    let url = ctx.urls.detail_url(&item.id);
    let html = ctx
        .shared
        .fetcher
        .run("detail page", |lease, _attempt| {
            let url = url.clone();
            async move { fetch_text(lease.client(), &url).await }
        })
        .await?;

    // Parsed synchronously; the HTML tree is not Send.
    let page = DetailPage::parse(&item.id, &html, &ctx.urls);
    Ok(ctx.extractors.extract(&page, &ctx.urls)?)
}
