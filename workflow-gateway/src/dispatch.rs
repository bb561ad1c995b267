//! Backends the gateway forwards decoded requests to.
//!
//! [`LocalBackend`] calls a [`TemplateRpc`] implementation in-process and only
//! supports unary methods. [`TemplateClient`] calls a remote RPC server and
//! also implements [`StreamingBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use workflow_gateway_core::Status;
use workflow_template::pb::{CreateResponse, Empty, FilterRequest, GetRequest, WorkflowTemplate};
use workflow_template::{CallContext, RpcReply, RpcStream, TemplateClient, TemplateRpc};

#[async_trait]
pub trait UnaryBackend: Send + Sync + 'static {
    async fn create_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<CreateResponse>, Status>;

    async fn get_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status>;

    async fn get_template_by_name(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status>;

    async fn delete_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<Empty>, Status>;

    async fn update_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<Empty>, Status>;
}

/// A backend that can also serve `ListTemplates`.
#[async_trait]
pub trait StreamingBackend: UnaryBackend {
    async fn list_templates(
        &self,
        ctx: CallContext,
        request: FilterRequest,
    ) -> Result<RpcReply<RpcStream<WorkflowTemplate>>, Status>;
}

/// In-process dispatch.
#[derive(Clone)]
pub struct LocalBackend {
    rpc: Arc<dyn TemplateRpc>,
}

impl LocalBackend {
    pub fn new(rpc: Arc<dyn TemplateRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl UnaryBackend for LocalBackend {
    async fn create_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<CreateResponse>, Status> {
        self.rpc.create_template(ctx, request).await.map(RpcReply::new)
    }

    async fn get_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status> {
        self.rpc.get_template(ctx, request).await.map(RpcReply::new)
    }

    async fn get_template_by_name(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status> {
        self.rpc
            .get_template_by_name(ctx, request)
            .await
            .map(RpcReply::new)
    }

    async fn delete_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<Empty>, Status> {
        self.rpc.delete_template(ctx, request).await.map(RpcReply::new)
    }

    async fn update_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<Empty>, Status> {
        self.rpc.update_template(ctx, request).await.map(RpcReply::new)
    }
}

#[async_trait]
impl UnaryBackend for TemplateClient {
    async fn create_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<CreateResponse>, Status> {
        Ok(TemplateClient::create_template(self, &ctx, &request).await?)
    }

    async fn get_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status> {
        Ok(TemplateClient::get_template(self, &ctx, &request).await?)
    }

    async fn get_template_by_name(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, Status> {
        Ok(TemplateClient::get_template_by_name(self, &ctx, &request).await?)
    }

    async fn delete_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<RpcReply<Empty>, Status> {
        Ok(TemplateClient::delete_template(self, &ctx, &request).await?)
    }

    async fn update_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<RpcReply<Empty>, Status> {
        Ok(TemplateClient::update_template(self, &ctx, &request).await?)
    }
}

#[async_trait]
impl StreamingBackend for TemplateClient {
    async fn list_templates(
        &self,
        ctx: CallContext,
        request: FilterRequest,
    ) -> Result<RpcReply<RpcStream<WorkflowTemplate>>, Status> {
        let reply = TemplateClient::list_templates(self, &ctx, &request).await?;
        Ok(reply.map(|messages| messages.map_err(Status::from).boxed()))
    }
}
