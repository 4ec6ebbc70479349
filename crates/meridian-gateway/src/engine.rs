//! Remote collaborator clients.
//!
//! The OLAP engine and resolver collaborators are separate services spoken
//! to over gRPC. Channels are lazily connected and cached; keepalive is
//! tuned for long-lived streaming result transfers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_common::proto::olap_result_frame::Payload;
use meridian_common::proto::olap_service_client::OlapServiceClient;
use meridian_common::proto::resolver_service_client::ResolverServiceClient;
use meridian_common::proto::{
    ColumnDescriptor, CostEstimate, EstimateCostRequest, OlapExecuteRequest, OlapResultFrame,
    ResolveRequest, SubQuery,
};
use meridian_common::{GatewayError, Result};
use tokio::sync::RwLock;
use tonic::transport::Channel;
use tracing::debug;

use crate::marshal::from_data_value;
use crate::runtime::{CellValue, Claims, CostEstimator, Cursor, OlapEngine, Resolver};

async fn connect(addr: &str) -> Result<Channel> {
    debug!(addr, "connecting to collaborator");
    let channel = Channel::from_shared(addr.to_string())
        .map_err(|e| GatewayError::Config(format!("invalid collaborator address: {}", e)))?
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Some(Duration::from_secs(10)))
        .http2_keep_alive_interval(Duration::from_secs(10))
        .keep_alive_timeout(Duration::from_secs(20))
        .keep_alive_while_idle(true)
        .connect()
        .await?;
    Ok(channel)
}

/// OLAP engine reached over gRPC.
pub struct RemoteOlapEngine {
    connector: String,
    addr: String,
    client: Arc<RwLock<Option<OlapServiceClient<Channel>>>>,
}

impl RemoteOlapEngine {
    pub fn new(connector: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            addr: addr.into(),
            client: Arc::new(RwLock::new(None)),
        }
    }

    async fn get_client(&self) -> Result<OlapServiceClient<Channel>> {
        {
            let reader = self.client.read().await;
            if let Some(client) = reader.as_ref() {
                return Ok(client.clone());
            }
        }

        let channel = connect(&self.addr).await?;
        let client = OlapServiceClient::new(channel);

        let mut writer = self.client.write().await;
        *writer = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl OlapEngine for RemoteOlapEngine {
    fn connector(&self) -> &str {
        &self.connector
    }

    async fn execute(&self, instance_id: &str, sql: &str) -> Result<Box<dyn Cursor>> {
        let mut client = self.get_client().await?;
        let response = client
            .execute(OlapExecuteRequest {
                instance_id: instance_id.to_string(),
                connector: self.connector.clone(),
                sql: sql.to_string(),
            })
            .await
            .map_err(GatewayError::from)?;
        let cursor = FrameCursor::open(response.into_inner()).await?;
        Ok(Box::new(cursor))
    }

    fn cost_estimator(&self) -> Option<&dyn CostEstimator> {
        Some(self)
    }
}

#[async_trait]
impl CostEstimator for RemoteOlapEngine {
    async fn estimate_query_cost(&self, instance_id: &str, sql: &str) -> Result<CostEstimate> {
        let mut client = self.get_client().await?;
        match client
            .estimate_cost(EstimateCostRequest {
                instance_id: instance_id.to_string(),
                connector: self.connector.clone(),
                sql: sql.to_string(),
            })
            .await
        {
            Ok(response) => Ok(response.into_inner()),
            // An engine without the endpoint is an estimation failure, which
            // admission control treats as fail-open.
            Err(status) => Err(GatewayError::EstimationFailed(
                status.message().to_string(),
            )),
        }
    }
}

/// Resolver collaborator reached over gRPC.
pub struct RemoteResolver {
    addr: String,
    client: Arc<RwLock<Option<ResolverServiceClient<Channel>>>>,
}

impl RemoteResolver {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client: Arc::new(RwLock::new(None)),
        }
    }

    async fn get_client(&self) -> Result<ResolverServiceClient<Channel>> {
        {
            let reader = self.client.read().await;
            if let Some(client) = reader.as_ref() {
                return Ok(client.clone());
            }
        }

        let channel = connect(&self.addr).await?;
        let client = ResolverServiceClient::new(channel);

        let mut writer = self.client.write().await;
        *writer = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Resolver for RemoteResolver {
    async fn resolve(
        &self,
        instance_id: &str,
        query: &SubQuery,
        claims: &Claims,
    ) -> Result<Box<dyn Cursor>> {
        let mut client = self.get_client().await?;
        let response = client
            .resolve(ResolveRequest {
                instance_id: instance_id.to_string(),
                query: Some(query.clone()),
                claims: claims.clone(),
            })
            .await
            .map_err(GatewayError::from)?;
        let cursor = FrameCursor::open(response.into_inner()).await?;
        Ok(Box::new(cursor))
    }
}

/// Cursor over a streamed sequence of result frames: one schema frame, then
/// row frames until the stream closes or an error frame arrives.
struct FrameCursor {
    schema: Vec<ColumnDescriptor>,
    stream: tonic::Streaming<OlapResultFrame>,
    done: bool,
}

impl FrameCursor {
    async fn open(mut stream: tonic::Streaming<OlapResultFrame>) -> Result<Self> {
        // The first frame carries the schema; an empty stream is an empty
        // result with no columns.
        loop {
            match stream.message().await.map_err(GatewayError::from)? {
                Some(frame) => match frame.payload {
                    Some(Payload::Schema(schema)) => {
                        return Ok(Self {
                            schema: schema.columns,
                            stream,
                            done: false,
                        });
                    }
                    Some(Payload::Error(message)) => {
                        return Err(GatewayError::QueryExecutionFailed(message));
                    }
                    Some(Payload::Row(_)) => {
                        return Err(GatewayError::Internal(
                            "collaborator sent a row frame before the schema frame".to_string(),
                        ));
                    }
                    None => continue,
                },
                None => {
                    return Ok(Self {
                        schema: Vec::new(),
                        stream,
                        done: true,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Cursor for FrameCursor {
    fn schema(&self) -> &[ColumnDescriptor] {
        &self.schema
    }

    async fn try_next(&mut self) -> Result<Option<Vec<CellValue>>> {
        if self.done {
            return Ok(None);
        }
        loop {
            match self.stream.message().await.map_err(GatewayError::from)? {
                Some(frame) => match frame.payload {
                    Some(Payload::Row(row)) => {
                        let cells: Vec<CellValue> =
                            row.values.into_iter().map(from_data_value).collect();
                        return Ok(Some(cells));
                    }
                    Some(Payload::Error(message)) => {
                        self.done = true;
                        return Err(GatewayError::QueryExecutionFailed(message));
                    }
                    // Duplicate schema frames are tolerated and skipped.
                    Some(Payload::Schema(_)) => continue,
                    None => continue,
                },
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}
