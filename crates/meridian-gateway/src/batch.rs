//! Batch dispatch: executes a heterogeneous set of sub-queries concurrently
//! and streams back one tagged result per entry.
//!
//! Each sub-query runs as its own task. Results are posted to a single
//! writer channel feeding the response stream, so concurrent completions
//! never touch the transport directly. A failing entry yields an error-only
//! response for its index and never disturbs its siblings.

use std::sync::Arc;

use meridian_common::proto::query_batch_response::Result as BatchResult;
use meridian_common::proto::sub_query::Kind;
use meridian_common::proto::{
    ColumnCardinalityResponse, ColumnNullCountResponse, ColumnTopKResponse, DataRow,
    MetricsAggregationResponse, MetricsToplistResponse, MetricsTotalsResponse, QueryBatchEntry,
    QueryBatchResponse, ResultSchema, SubQuery, TableCardinalityResponse, TableColumnsResponse,
    TableRowsResponse, TopKEntry,
};
use meridian_common::{GatewayError, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::marshal::{cell_to_text, to_data_row};
use crate::metrics;
use crate::runtime::{CellValue, Claims, Cursor, Resolver};

pub struct BatchDispatcher {
    resolver: Arc<dyn Resolver>,
}

impl BatchDispatcher {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// Run every entry concurrently and write exactly `entries.len()`
    /// responses to `tx`, in completion order. Returns once all tasks have
    /// finished or the token was cancelled.
    pub async fn dispatch(
        &self,
        instance_id: &str,
        entries: Vec<QueryBatchEntry>,
        claims: Claims,
        tx: mpsc::Sender<QueryBatchResponse>,
        cancel: CancellationToken,
    ) {
        let mut tasks = JoinSet::new();

        for entry in entries {
            let resolver = self.resolver.clone();
            let instance_id = instance_id.to_string();
            let claims = claims.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let index = entry.index;
                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(index, "batch entry cancelled before completion");
                        return;
                    }
                    outcome = resolve_entry(resolver.as_ref(), &instance_id, entry, &claims) => {
                        match outcome {
                            Ok(result) => {
                                metrics::record_batch_entry("ok");
                                QueryBatchResponse {
                                    index,
                                    error: String::new(),
                                    result: Some(result),
                                }
                            }
                            Err(err) => {
                                metrics::record_batch_entry("error");
                                QueryBatchResponse {
                                    index,
                                    error: err.to_string(),
                                    result: None,
                                }
                            }
                        }
                    }
                };

                // A closed receiver means the caller is gone; stop the rest
                // of the batch rather than resolving into the void.
                if tx.send(response).await.is_err() {
                    cancel.cancel();
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }
}

/// Resolve one entry and shape its cursor into the per-kind result payload.
async fn resolve_entry(
    resolver: &dyn Resolver,
    instance_id: &str,
    entry: QueryBatchEntry,
    claims: &Claims,
) -> Result<BatchResult> {
    let query: SubQuery = entry
        .query
        .ok_or_else(|| GatewayError::InvalidArgument("batch entry has no query".to_string()))?;
    let kind = query
        .kind
        .clone()
        .ok_or_else(|| GatewayError::InvalidArgument("batch entry has no query kind".to_string()))?;

    if matches!(kind, Kind::AnalyticSqlRequest(_)) {
        return Err(GatewayError::Unsupported(
            "analytic SQL is not supported in batch requests".to_string(),
        ));
    }

    let mut cursor = resolver.resolve(instance_id, &query, claims).await?;

    let result = match kind {
        Kind::MetricsAggregationRequest(_) => {
            let (schema, data) = collect_all(cursor.as_mut()).await?;
            BatchResult::MetricsAggregationResponse(MetricsAggregationResponse {
                schema: Some(schema),
                data,
            })
        }
        Kind::MetricsToplistRequest(_) => {
            let (schema, data) = collect_all(cursor.as_mut()).await?;
            BatchResult::MetricsToplistResponse(MetricsToplistResponse {
                schema: Some(schema),
                data,
            })
        }
        Kind::MetricsTotalsRequest(_) => {
            let schema = ResultSchema {
                columns: cursor.schema().to_vec(),
            };
            let data = cursor.try_next().await?.map(to_data_row);
            BatchResult::MetricsTotalsResponse(MetricsTotalsResponse {
                schema: Some(schema),
                data,
            })
        }
        Kind::ColumnTopKRequest(_) => {
            let mut entries = Vec::new();
            while let Some(row) = cursor.try_next().await? {
                entries.push(TopKEntry {
                    value: row
                        .first()
                        .and_then(cell_to_text)
                        .unwrap_or_default(),
                    count: row.get(1).map(cell_as_f64).unwrap_or(0.0),
                });
            }
            BatchResult::ColumnTopKResponse(ColumnTopKResponse { entries })
        }
        Kind::ColumnNullCountRequest(_) => BatchResult::ColumnNullCountResponse(
            ColumnNullCountResponse {
                count: scalar_f64(cursor.as_mut()).await?,
            },
        ),
        Kind::ColumnCardinalityRequest(_) => BatchResult::ColumnCardinalityResponse(
            ColumnCardinalityResponse {
                cardinality: scalar_f64(cursor.as_mut()).await?,
            },
        ),
        Kind::TableCardinalityRequest(_) => BatchResult::TableCardinalityResponse(
            TableCardinalityResponse {
                cardinality: scalar_f64(cursor.as_mut()).await? as i64,
            },
        ),
        Kind::TableColumnsRequest(_) => BatchResult::TableColumnsResponse(TableColumnsResponse {
            profile_columns: cursor.schema().to_vec(),
        }),
        Kind::TableRowsRequest(_) => {
            let (schema, data) = collect_all(cursor.as_mut()).await?;
            BatchResult::TableRowsResponse(TableRowsResponse {
                schema: Some(schema),
                data,
            })
        }
        Kind::AnalyticSqlRequest(_) => unreachable!("rejected above"),
    };

    Ok(result)
}

/// Drain a cursor fully into wire rows.
async fn collect_all(cursor: &mut dyn Cursor) -> Result<(ResultSchema, Vec<DataRow>)> {
    let schema = ResultSchema {
        columns: cursor.schema().to_vec(),
    };
    let mut data = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        data.push(to_data_row(row));
    }
    Ok((schema, data))
}

/// Read the single scalar a profile query produces.
async fn scalar_f64(cursor: &mut dyn Cursor) -> Result<f64> {
    match cursor.try_next().await? {
        Some(row) => Ok(row.first().map(cell_as_f64).unwrap_or(0.0)),
        None => Ok(0.0),
    }
}

fn cell_as_f64(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Int(v) => *v as f64,
        CellValue::UInt(v) => *v as f64,
        CellValue::Float(v) => *v,
        CellValue::Bool(v) => *v as u8 as f64,
        CellValue::String(v) => v.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
