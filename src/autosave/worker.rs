use std::{rc::Rc, time::Duration};

use color_eyre::{Result, eyre::Context};
use futures::{
    FutureExt,
    future::{LocalBoxFuture, OptionFuture},
};
use tokio::{
    runtime::Builder,
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::LocalSet,
    time::{Instant, sleep_until, timeout},
};
use tracing::{debug, error, info, warn};

use super::{
    Command, Event,
    engine::{ManualSave, SyncEngine},
    executor::AttemptTicket,
    status::StatusView,
    store::{DocVersion, Document, DocumentId, DocumentStore, StoreError},
};
use crate::config::AutosaveConfig;

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type InFlightSave = LocalBoxFuture<'static, (AttemptTicket, Result<DocVersion, StoreError>)>;

/// Runs the autosave worker for one document on a dedicated thread.
///
/// The worker is single-threaded: edits, timers and the one store call in
/// flight are interleaved on a current-thread runtime.
pub fn start_async<S>(
    store: S,
    document_id: Option<DocumentId>,
    config: AutosaveConfig,
    cmd_rx: UnboundedReceiver<Command>,
    evt_tx: UnboundedSender<Event>,
) -> Result<std::thread::JoinHandle<()>>
where
    S: DocumentStore + Send + 'static,
{
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("building the autosave runtime")?;
    let handle = std::thread::Builder::new()
        .name("autosave".into())
        .spawn(move || {
            let local = LocalSet::new();
            local.spawn_local(async move {
                let failure_tx = evt_tx.clone();
                let result = async {
                    AutosaveWorker::open(store, document_id, &config, cmd_rx, evt_tx)
                        .await?
                        .run()
                        .await
                }
                .await;
                if let Err(err) = result {
                    error!("Autosave worker stopped: {err:?}");
                    if let Err(err) = failure_tx.send(Event::Failure(format!("{err:#}"))) {
                        debug!("Unable to report the stopped worker: {err:?}");
                    }
                }
            });
            runtime.block_on(local);
        })?;
    Ok(handle)
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

struct AutosaveWorker<S> {
    store: Rc<S>,
    /// the single owned snapshot of the open document
    document: Document,
    engine: SyncEngine,
    cmd_rx: UnboundedReceiver<Command>,
    evt_tx: UnboundedSender<Event>,
    in_flight: Option<InFlightSave>,
    /// `Edit` commands taken in so far, echoed with every status
    edits_applied: u64,
    published: Option<(StatusView, u64)>,
}

impl<S: DocumentStore + 'static> AutosaveWorker<S> {
    async fn open(
        store: S,
        document_id: Option<DocumentId>,
        config: &AutosaveConfig,
        cmd_rx: UnboundedReceiver<Command>,
        evt_tx: UnboundedSender<Event>,
    ) -> Result<Self> {
        let document = match document_id {
            Some(id) => store
                .fetch(&id)
                .await
                .wrap_err_with(|| format!("loading document {id}"))?
                .unwrap_or_else(|| {
                    info!(%id, "Document is not stored yet, starting empty");
                    Document::empty(id)
                }),
            None => Document::empty(DocumentId::new()),
        };
        if document.version.is_new() {
            info!(id = %document.id, "Opened a new document, the first save creates it");
        } else {
            info!(id = %document.id, version = %document.version, "Opened document");
        }

        let engine = SyncEngine::new(config, document.version);
        let worker = Self {
            store: Rc::new(store),
            document,
            engine,
            cmd_rx,
            evt_tx,
            in_flight: None,
            edits_applied: 0,
            published: None,
        };
        worker.send(Event::Opened(worker.document.clone()));
        Ok(worker)
    }

    async fn run(mut self) -> Result<()> {
        self.publish();
        loop {
            let deadline = self.engine.next_deadline().map(Instant::from_std);
            select! {
                biased; // Stop should take prio
                _ = self.evt_tx.closed() => {
                    debug!("Autosave events channel closed, shutting down autosave worker...");
                    self.cmd_rx.close();
                    return self.shutdown().await;
                },
                Some((ticket, result)) = OptionFuture::from(self.in_flight.as_mut()) => {
                    self.in_flight = None;
                    self.settle(ticket, result);
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Edit(content)) => {
                        self.document.content = content;
                        self.edits_applied += 1;
                        self.engine.on_edit(now());
                    }
                    Some(Command::SaveNow) => {
                        let outcome = self.engine.save_now();
                        info!(%outcome, "Manual save requested");
                        self.send(Event::ManualSave(outcome));
                    }
                    Some(Command::Close) | None => return self.shutdown().await,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {},
            }
            self.dispatch();
            self.publish();
        }
    }

    fn settle(&mut self, ticket: AttemptTicket, result: Result<DocVersion, StoreError>) {
        if let Some(settled) = self.engine.complete(ticket, result, now()) {
            debug!(%ticket, status = %self.engine.status(), "Save settled: {settled:?}");
        }
        self.document.version = self.engine.current_version();
    }

    /// Starts the save the engine asks for, if any.
    fn dispatch(&mut self) {
        let request = self.engine.poll(now());
        if self.engine.take_skipped_manual() {
            self.send(Event::ManualSave(ManualSave::NothingToSave));
        }
        let Some(request) = request else {
            return;
        };
        debug_assert!(
            self.in_flight.is_none() && self.engine.is_in_flight(),
            "engine and worker disagree on the save in flight"
        );
        info!(
            ticket = %request.ticket,
            origin = %request.origin,
            expected = %request.expected_version,
            retry = request.retry_count,
            "Saving document"
        );
        let store = Rc::clone(&self.store);
        let id = self.document.id.clone();
        let content = self.document.content.clone();
        self.in_flight = Some(
            async move {
                let result = store.save(&id, &content, request.expected_version).await;
                (request.ticket, result)
            }
            .boxed_local(),
        );
    }

    fn publish(&mut self) {
        let current = (self.engine.view(), self.edits_applied);
        if self.published.as_ref() == Some(&current) {
            return;
        }
        let (view, edits_applied) = current.clone();
        debug!(status = %view.status, version = %view.version, edits_applied, "Save status changed");
        self.published = Some(current);
        self.send(Event::Status {
            view,
            edits_applied,
        });
    }

    fn send(&self, event: Event) {
        if let Err(err) = self.evt_tx.send(event) {
            debug!("Unable to send autosave event: {err:?}");
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        self.engine.close();
        if let Some(in_flight) = self.in_flight.take() {
            warn!("Still waiting for the save in flight before closing");
            match timeout(SHUTDOWN_FLUSH_TIMEOUT, in_flight).await {
                Ok((ticket, result)) => self.settle(ticket, result),
                Err(_) => warn!(
                    timeout = ?SHUTDOWN_FLUSH_TIMEOUT,
                    "Shutdown flush timeout expired with a save still in flight"
                ),
            }
        }
        self.publish();

        let has_unsaved_changes = self.engine.has_unsaved_changes();
        if has_unsaved_changes {
            warn!(
                id = %self.document.id,
                last_saved_at = ?self.engine.last_saved_at(),
                "Closing with unsaved changes"
            );
        }
        self.send(Event::Closed {
            has_unsaved_changes,
        });
        Ok(())
    }
}
