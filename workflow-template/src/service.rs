//! The template facade: CRUD over a [`TemplateStore`].
//!
//! Every operation runs under the caller's [`CallContext`] and is observed
//! with the labels from [`crate::observe`]. Only listing is gated on store
//! readiness.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::context::{CallContext, Interrupted};
use crate::error::TemplateError;
use crate::filter::NameFilter;
use crate::observe::{self, CallObserver, observed};
use crate::readiness::ReadinessSource;
use crate::store::{Template, TemplateKey, TemplateStore};

/// Default capacity of the channel between the store and a list consumer.
pub const DEFAULT_LIST_BUFFER: usize = 16;

pub type TemplateListStream = BoxStream<'static, Result<Template, TemplateError>>;

pub struct TemplateService<S> {
    store: Arc<S>,
    readiness: Arc<dyn ReadinessSource>,
    list_buffer: usize,
}

impl<S> Clone for TemplateService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            readiness: self.readiness.clone(),
            list_buffer: self.list_buffer,
        }
    }
}

impl<S: TemplateStore> TemplateService<S> {
    pub fn new(store: Arc<S>, readiness: Arc<dyn ReadinessSource>) -> Self {
        Self {
            store,
            readiness,
            list_buffer: DEFAULT_LIST_BUFFER,
        }
    }

    pub fn with_list_buffer(mut self, list_buffer: usize) -> Self {
        self.list_buffer = list_buffer.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Store a new template under a freshly generated id.
    pub async fn create(
        &self,
        ctx: &CallContext,
        name: &str,
        data: &str,
    ) -> Result<Uuid, TemplateError> {
        observed(observe::CREATE, async {
            let id = Uuid::new_v4();
            ctx.run(self.store.create_template(id, name, data)).await??;
            tracing::debug!(%id, name, "template created");
            Ok(id)
        })
        .await
    }

    pub async fn get_by_id(&self, ctx: &CallContext, id: &str) -> Result<Template, TemplateError> {
        observed(observe::GET, async {
            let id = parse_id(id)?;
            Ok(ctx.run(self.store.get_template_by_id(id)).await??)
        })
        .await
    }

    pub async fn get_by_name(
        &self,
        ctx: &CallContext,
        name: &str,
    ) -> Result<Template, TemplateError> {
        observed(observe::GET, async {
            Ok(ctx.run(self.store.get_template_by_name(name)).await??)
        })
        .await
    }

    /// Replace name and data of the template with `id`.
    pub async fn update(
        &self,
        ctx: &CallContext,
        id: &str,
        name: &str,
        data: &str,
    ) -> Result<(), TemplateError> {
        observed(observe::UPDATE, async {
            let id = parse_id(id)?;
            ctx.run(self.store.update_template(id, name, data)).await??;
            Ok(())
        })
        .await
    }

    /// Remove a template by id when `id` is set, by name otherwise.
    ///
    /// Removing a template that does not exist succeeds.
    pub async fn delete(&self, ctx: &CallContext, id: &str, name: &str) -> Result<(), TemplateError> {
        observed(observe::DELETE, async {
            let key = if id.is_empty() {
                TemplateKey::Name(name.to_owned())
            } else {
                TemplateKey::Id(parse_id(id)?)
            };
            ctx.run(self.store.delete_template(&key)).await??;
            tracing::debug!(%key, "template deleted");
            Ok(())
        })
        .await
    }

    /// Stream the templates whose name matches `filter`, in store order.
    ///
    /// Fails with [`TemplateError::NotReady`] until the store is ready. Records
    /// are handed over one at a time through a bounded channel; the producer
    /// stops when the consumer goes away or the call is interrupted.
    pub async fn list(
        &self,
        ctx: &CallContext,
        filter: &str,
    ) -> Result<TemplateListStream, TemplateError> {
        let mut call = CallObserver::untimed(observe::LIST);
        if !self.readiness.is_ready() {
            let err = TemplateError::NotReady;
            call.fail(&err);
            return Err(err);
        }
        call.start_timer();

        let opened = async {
            let filter = NameFilter::parse(filter)
                .map_err(|e| TemplateError::malformed(format!("invalid filter {filter:?}: {e}")))?;
            Ok::<_, TemplateError>(ctx.run(self.store.list_templates(filter)).await??)
        };
        let mut records = match opened.await {
            Ok(records) => records,
            Err(err) => {
                call.fail(&err);
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(self.list_buffer);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                let next = match ctx.run(records.next()).await {
                    Ok(next) => next,
                    Err(interrupted) => return abort_list(&call, &tx, interrupted).await,
                };
                let template = match next {
                    Some(Ok(template)) => template,
                    Some(Err(err)) => {
                        let err = TemplateError::from(err);
                        call.fail(&err);
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    None => {
                        call.hit();
                        return;
                    }
                };
                match ctx.run(tx.send(Ok(template))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        tracing::debug!("list consumer went away");
                        return;
                    }
                    Err(interrupted) => return abort_list(&call, &tx, interrupted).await,
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

async fn abort_list(
    call: &CallObserver,
    tx: &mpsc::Sender<Result<Template, TemplateError>>,
    interrupted: Interrupted,
) {
    let err = TemplateError::from(interrupted);
    call.fail(&err);
    let _ = tx.send(Err(err)).await;
}

fn parse_id(id: &str) -> Result<Uuid, TemplateError> {
    Uuid::parse_str(id).map_err(|e| TemplateError::malformed(format!("invalid template id {id:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::observe::testing::CapturingRecorder;
    use crate::observe::{DURATION_SECONDS, ERRORS_TOTAL, HITS_TOTAL, IN_FLIGHT, STALLS_TOTAL};
    use crate::readiness::ReadinessFlag;
    use crate::store::{MemoryStore, StoreError, TemplateRecords};

    fn service(ready: bool) -> TemplateService<MemoryStore> {
        let readiness = if ready {
            ReadinessFlag::ready()
        } else {
            ReadinessFlag::new()
        };
        TemplateService::new(Arc::new(MemoryStore::new()), Arc::new(readiness))
    }

    async fn list_names(svc: &TemplateService<MemoryStore>, filter: &str) -> Vec<String> {
        svc.list(&CallContext::new(), filter)
            .await
            .unwrap()
            .map_ok(|t| t.name)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_generates_unique_ids() {
        let svc = service(true);
        let ctx = CallContext::new();

        let mut ids = HashSet::new();
        for i in 0..10 {
            let id = svc.create(&ctx, &format!("template-{i}"), "{}").await.unwrap();
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected_without_write() {
        let svc = service(true);
        let ctx = CallContext::new();

        svc.create(&ctx, "build", "first").await.unwrap();
        let err = svc.create(&ctx, "build", "second").await.unwrap_err();

        assert!(matches!(err, TemplateError::DuplicateName(ref name) if name == "build"));
        assert_eq!(svc.store().len().await, 1);
        assert_eq!(svc.get_by_name(&ctx, "build").await.unwrap().data, "first");
    }

    #[tokio::test]
    async fn test_get_round_trips_name_and_data() {
        let svc = service(true);
        let ctx = CallContext::new();

        let id = svc.create(&ctx, "build", "steps: [compile]").await.unwrap();

        let by_id = svc.get_by_id(&ctx, &id.to_string()).await.unwrap();
        assert_eq!(by_id.name, "build");
        assert_eq!(by_id.data, "steps: [compile]");

        let by_name = svc.get_by_name(&ctx, "build").await.unwrap();
        assert_eq!(by_name.id, id);

        let missing = svc.get_by_id(&ctx, &Uuid::new_v4().to_string()).await;
        assert!(matches!(missing, Err(TemplateError::NotFound)));
        assert!(matches!(
            svc.get_by_name(&ctx, "deploy").await,
            Err(TemplateError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_update() {
        let svc = service(true);
        let ctx = CallContext::new();
        let id = svc.create(&ctx, "build", "v1").await.unwrap().to_string();

        svc.update(&ctx, &id, "build", "v2").await.unwrap();
        assert_eq!(svc.get_by_id(&ctx, &id).await.unwrap().data, "v2");

        let err = svc.update(&ctx, "not-a-uuid", "x", "y").await.unwrap_err();
        assert!(matches!(err, TemplateError::Malformed(_)));

        let err = svc
            .update(&ctx, &Uuid::new_v4().to_string(), "x", "y")
            .await
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let svc = service(true);
        let ctx = CallContext::new();
        let id = svc.create(&ctx, "build", "").await.unwrap().to_string();
        svc.create(&ctx, "deploy", "").await.unwrap();

        svc.delete(&ctx, &id, "").await.unwrap();
        svc.delete(&ctx, &id, "").await.unwrap();
        assert!(matches!(
            svc.get_by_id(&ctx, &id).await,
            Err(TemplateError::NotFound)
        ));

        svc.delete(&ctx, "", "deploy").await.unwrap();
        svc.delete(&ctx, "", "deploy").await.unwrap();
        assert!(svc.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_list_filters_in_store_order() {
        let svc = service(true);
        let ctx = CallContext::new();
        for name in ["build-linux", "deploy", "build-mac", "test"] {
            svc.create(&ctx, name, "").await.unwrap();
        }

        assert_eq!(
            list_names(&svc, "*").await,
            ["build-linux", "deploy", "build-mac", "test"]
        );
        assert_eq!(list_names(&svc, "build-*").await, ["build-linux", "build-mac"]);
        assert_eq!(list_names(&svc, "deploy").await, ["deploy"]);
        assert_eq!(list_names(&svc, "").await.len(), 4);
    }

    #[tokio::test]
    async fn test_list_with_small_buffer_yields_everything() {
        let svc = service(true).with_list_buffer(1);
        let ctx = CallContext::new();
        for i in 0..20 {
            svc.create(&ctx, &format!("t{i:02}"), "").await.unwrap();
        }

        let names = list_names(&svc, "t*").await;
        assert_eq!(names.len(), 20);
        assert_eq!(names.first().map(String::as_str), Some("t00"));
        assert_eq!(names.last().map(String::as_str), Some("t19"));
    }

    #[test]
    fn test_list_not_ready_stalls() {
        let recorder = CapturingRecorder::default();
        let svc = service(false);

        let result = recorder.run(async { svc.list(&CallContext::new(), "*").await.map(|_| ()) });

        assert!(matches!(result, Err(TemplateError::NotReady)));
        assert_eq!(recorder.value(STALLS_TOTAL, "ListTemplates"), 1.0);
        assert_eq!(recorder.value(ERRORS_TOTAL, "ListTemplates"), 0.0);
        assert_eq!(recorder.value(IN_FLIGHT, "ListTemplates"), 0.0);
        assert_eq!(recorder.value(DURATION_SECONDS, "ListTemplates"), 0.0);
    }

    #[test]
    fn test_list_success_counts_hit() {
        let recorder = CapturingRecorder::default();
        let svc = service(true);

        let names = recorder.run(async {
            svc.create(&CallContext::new(), "build", "").await.unwrap();
            list_names(&svc, "").await
        });

        assert_eq!(names, ["build"]);
        assert_eq!(recorder.value(HITS_TOTAL, "ListTemplates"), 1.0);
        assert_eq!(recorder.value(IN_FLIGHT, "ListTemplates"), 0.0);
        assert_eq!(recorder.value(DURATION_SECONDS, "ListTemplates"), 1.0);
    }

    #[test]
    fn test_duplicate_counts_error() {
        let recorder = CapturingRecorder::default();
        let svc = service(true);

        recorder.run(async {
            let ctx = CallContext::new();
            svc.create(&ctx, "build", "").await.unwrap();
            svc.create(&ctx, "build", "").await.unwrap_err();
        });

        assert_eq!(recorder.value(ERRORS_TOTAL, "CreateTemplate"), 1.0);
        assert_eq!(recorder.value(IN_FLIGHT, "CreateTemplate"), 0.0);
    }

    struct StalledStore;

    #[async_trait]
    impl TemplateStore for StalledStore {
        async fn create_template(&self, _: Uuid, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn get_template_by_id(&self, _: Uuid) -> Result<Template, StoreError> {
            Err(StoreError::backend("connection refused"))
        }

        async fn get_template_by_name(&self, _: &str) -> Result<Template, StoreError> {
            std::future::pending().await
        }

        async fn update_template(&self, _: Uuid, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn delete_template(&self, _: &TemplateKey) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn list_templates(&self, _: NameFilter) -> Result<TemplateRecords, StoreError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    fn stalled() -> TemplateService<StalledStore> {
        TemplateService::new(Arc::new(StalledStore), Arc::new(ReadinessFlag::ready()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_store_wait() {
        let svc = stalled();
        let ctx = CallContext::new().with_timeout(Some(Duration::from_millis(100)));

        let err = svc.create(&ctx, "build", "").await.unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Interrupted(Interrupted::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_store_wait() {
        let svc = stalled();
        let ctx = CallContext::new();
        ctx.cancel();

        let err = svc.get_by_name(&ctx, "build").await.unwrap_err();
        assert!(matches!(err, TemplateError::Interrupted(Interrupted::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_deadline_ends_stream_with_error() {
        let svc = stalled();
        let ctx = CallContext::new().with_timeout(Some(Duration::from_millis(100)));

        let mut stream = svc.list(&ctx, "*").await.unwrap();
        let item = stream.next().await;

        assert!(matches!(
            item,
            Some(Err(TemplateError::Interrupted(Interrupted::DeadlineExceeded)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_list_cancel_ends_stream_with_error() {
        let svc = service(true).with_list_buffer(1);
        let ctx = CallContext::new();
        for i in 0..10 {
            svc.create(&ctx, &format!("t{i}"), "").await.unwrap();
        }

        let mut stream = svc.list(&ctx, "*").await.unwrap();
        assert!(matches!(stream.next().await, Some(Ok(_))));
        ctx.cancel();

        let rest: Vec<_> = stream.collect().await;
        let (last, delivered) = rest.split_last().unwrap();
        assert!(matches!(
            last,
            Err(TemplateError::Interrupted(Interrupted::Cancelled))
        ));
        assert!(delivered.iter().all(Result::is_ok));
        assert!(delivered.len() < 9);
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal() {
        let svc = stalled();
        let err = svc
            .get_by_id(&CallContext::new(), &Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.code(), workflow_gateway_core::Code::Internal);
    }
}
