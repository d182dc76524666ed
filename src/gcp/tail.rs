//! Live tailing of request logs.
//!
//! The tail stream is driven by two tasks: one sends the subscription, the
//! other pulls batches. Both report into channels which the calling task
//! drains, converting and handing out entries one by one.

use tokio::sync::mpsc;

use super::backend::{Connection, Connector, TailSink, TailSource};
use super::fetch::{base_filters, resource_name};
use super::model::{LogEntry, TailRequest};
use crate::cancel::Cancellation;
use crate::combined::RequestEntry;
use crate::error::{Error, Result};

/// Batches the receiver may pull ahead of a slow consumer.
pub const BATCH_CHANNEL_CAPACITY: usize = 16;

/// Subscription for new request logs of `site`, there is no time bound.
pub fn tail_request(site: &str) -> TailRequest {
    TailRequest {
        resource_names: vec![resource_name(site)],
        filter: base_filters(site).join(" AND "),
    }
}

/// Call `on_entry` for every new request log of `site` until the stream
/// ends, fails or `cancel` fires.
///
/// `on_entry` is called sequentially in the order entries arrive. Entries
/// handed out before an error are not taken back.
pub async fn tail_logs<C, F>(
    connector: &C,
    site: &str,
    mut on_entry: F,
    mut cancel: Cancellation,
) -> Result<()>
where
    C: Connector,
    F: FnMut(RequestEntry),
{
    let mut conn = cancel
        .run(connector.connect(site))
        .await?
        .map_err(Error::Connection)?;
    let (sink, source) = cancel.run(conn.tail_entries()).await??;

    // each task reports at most one error
    let (err_tx, mut err_rx) = mpsc::channel::<Error>(2);
    let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<LogEntry>>(BATCH_CHANNEL_CAPACITY);

    log::info!("tailing logs of {}", site);

    let sender = tokio::spawn(send_request(sink, tail_request(site), err_tx.clone()));
    let receiver = tokio::spawn(receive_batches(source, batch_tx, err_tx));

    let result = consume(&mut batch_rx, &mut err_rx, &mut on_entry, &mut cancel).await;

    // dropping both halves closes the stream, the aborted tasks still own
    // them until they are polled once more
    sender.abort();
    receiver.abort();
    let _ = sender.await;
    let _ = receiver.await;

    match &result {
        Ok(()) => log::info!("tail of {} ended", site),
        Err(err) => log::warn!("tail of {} stopped: {}", site, err),
    }
    result
}

/// Send the subscription once. The sink is returned so it stays open until
/// the task is aborted.
async fn send_request<S: TailSink>(
    mut sink: S,
    req: TailRequest,
    errors: mpsc::Sender<Error>,
) -> S {
    if let Err(err) = sink.send(req).await {
        let _ = errors.send(Error::Backend(err)).await;
    }
    sink
}

async fn receive_batches<S: TailSource>(
    mut source: S,
    batches: mpsc::Sender<Vec<LogEntry>>,
    errors: mpsc::Sender<Error>,
) {
    loop {
        match source.recv().await {
            Ok(Some(batch)) => {
                log::debug!("received batch of {} entries", batch.len());
                if batches.send(batch).await.is_err() {
                    // consumer is gone
                    return;
                }
            }
            Ok(None) => {
                let _ = errors.send(Error::StreamEnded).await;
                return;
            }
            Err(err) => {
                let _ = errors.send(Error::Backend(err)).await;
                return;
            }
        }
    }
}

async fn consume<F: FnMut(RequestEntry)>(
    batches: &mut mpsc::Receiver<Vec<LogEntry>>,
    errors: &mut mpsc::Receiver<Error>,
    on_entry: &mut F,
    cancel: &mut Cancellation,
) -> Result<()> {
    loop {
        // batches come first, a batch is always queued before the end of the
        // stream is reported
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(Error::Cancelled),
            Some(batch) = batches.recv() => {
                for raw in &batch {
                    on_entry(RequestEntry::try_from(raw)?);
                }
            }
            err = errors.recv() => {
                return match err {
                    Some(Error::StreamEnded) => Ok(()),
                    Some(err) => Err(err),
                    // both tasks are gone
                    None => Ok(()),
                };
            }
        }
    }
}
