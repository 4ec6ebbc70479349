//! gRPC surface of the gateway: the `QueryService` implementation.

use std::sync::Arc;

use meridian_common::proto::query_service_server::{QueryService, QueryServiceServer};
use meridian_common::proto::{
    ExecuteQueryRequest, ExecuteQueryResponse, QueryBatchRequest, QueryBatchResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::activity::ActivityClient;
use crate::batch::BatchDispatcher;
use crate::console;
use crate::runtime::{Claims, Permission, Runtime};

pub struct GatewayService {
    runtime: Arc<Runtime>,
    activity: Arc<dyn ActivityClient>,
}

impl GatewayService {
    pub fn new(runtime: Arc<Runtime>, activity: Arc<dyn ActivityClient>) -> Self {
        Self { runtime, activity }
    }

    pub fn into_server(self) -> QueryServiceServer<Self> {
        QueryServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl QueryService for GatewayService {
    type QueryBatchStream = ReceiverStream<Result<QueryBatchResponse, Status>>;

    async fn query_batch(
        &self,
        request: Request<QueryBatchRequest>,
    ) -> Result<Response<Self::QueryBatchStream>, Status> {
        let req = request.into_inner();

        if req.instance_id.trim().is_empty() {
            return Err(Status::invalid_argument("instance_id is required"));
        }
        if !self
            .runtime
            .can_instance(&req.instance_id, Permission::ReadMetrics)
        {
            return Err(Status::permission_denied(format!(
                "not allowed to query instance {:?}",
                req.instance_id
            )));
        }

        let resolver = self
            .runtime
            .resolver(&req.instance_id)
            .map_err(Status::from)?;

        debug!(
            instance_id = %req.instance_id,
            entries = req.queries.len(),
            "dispatching query batch"
        );

        let buffer = req.queries.len().max(1);
        let (batch_tx, mut batch_rx) = mpsc::channel::<QueryBatchResponse>(buffer);
        let (tx, rx) = mpsc::channel::<Result<QueryBatchResponse, Status>>(buffer);
        let cancel = CancellationToken::new();

        // Dispatcher task: owns the per-entry tasks, drops batch_tx when the
        // last entry has reported.
        let dispatcher = BatchDispatcher::new(resolver);
        let instance_id = req.instance_id.clone();
        let entries = req.queries;
        let dispatch_cancel = cancel.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(
                    &instance_id,
                    entries,
                    Claims::default(),
                    batch_tx,
                    dispatch_cancel,
                )
                .await;
        });

        // Forwarder: single writer into the response stream. A dropped
        // receiver means the client disconnected; cancel in-flight work and
        // discard the partial batch.
        tokio::spawn(async move {
            while let Some(response) = batch_rx.recv().await {
                if tx.send(Ok(response)).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn execute_query(
        &self,
        request: Request<ExecuteQueryRequest>,
    ) -> Result<Response<ExecuteQueryResponse>, Status> {
        let response =
            console::execute_query(&self.runtime, self.activity.as_ref(), request.into_inner())
                .await
                .map_err(Status::from)?;
        Ok(Response::new(response))
    }
}
