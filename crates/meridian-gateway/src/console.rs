//! Console execution: one ad-hoc SQL statement, guarded by the admission
//! controller, returning a bounded result preview.
//!
//! Admission outcomes (warn, block) are successful responses carrying a
//! status, not errors: the request was valid, policy intervened. Only
//! validation failures and cancellation surface as RPC errors.

use std::time::{Duration, Instant};

use meridian_common::proto::{ExecuteQueryRequest, ExecuteQueryResponse, QueryStatus};
use meridian_common::{GatewayError, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::{
    ActivityClient, ActivityEvent, EVENT_QUERY_BLOCKED, EVENT_QUERY_EXECUTED, EVENT_QUERY_FAILED,
    EVENT_QUERY_WARNED,
};
use crate::guardrails::{self, AdmissionDecision, GuardrailConfig};
use crate::marshal::{self, DEFAULT_ROW_LIMIT};
use crate::metrics;
use crate::runtime::{Permission, Runtime};

pub async fn execute_query(
    runtime: &Runtime,
    activity: &dyn ActivityClient,
    req: ExecuteQueryRequest,
) -> Result<ExecuteQueryResponse> {
    // Pure validation, before any collaborator call.
    if req.instance_id.trim().is_empty() {
        return Err(GatewayError::InvalidArgument(
            "instance_id is required".to_string(),
        ));
    }
    if req.sql.trim().is_empty() {
        return Err(GatewayError::InvalidArgument("sql is empty".to_string()));
    }

    if !runtime.can_instance(&req.instance_id, Permission::ReadOlap) {
        return Err(GatewayError::PermissionDenied(format!(
            "not allowed to query instance {:?}",
            req.instance_id
        )));
    }

    let connector_hint = if req.connector.is_empty() {
        None
    } else {
        Some(req.connector.as_str())
    };
    // The lease is released on every exit path below, including early
    // returns and cancellation.
    let engine = runtime.olap(&req.instance_id, connector_hint)?;
    let connector = engine.connector().to_string();

    let config = GuardrailConfig::load(&runtime.instance_variables(&req.instance_id)?);

    let query_id = Uuid::new_v4();
    debug!(%query_id, instance_id = %req.instance_id, connector = %connector, "evaluating console query");

    let record = |name: &'static str, bytes_scanned: i64, execution_time_ms: i64| {
        activity.record(ActivityEvent {
            name,
            instance_id: req.instance_id.clone(),
            connector: connector.clone(),
            bytes_scanned,
            execution_time_ms,
        });
    };

    let decision = guardrails::admit(
        &*engine,
        &req.instance_id,
        &req.sql,
        &config,
        req.confirm_cost_override,
    )
    .await;

    let bytes_scanned = match decision {
        AdmissionDecision::Block {
            bytes_scanned,
            reason,
        } => {
            metrics::record_admission("blocked");
            metrics::record_query("console", "blocked", 0.0);
            record(EVENT_QUERY_BLOCKED, bytes_scanned, 0);
            return Ok(ExecuteQueryResponse {
                status: QueryStatus::BlockedLimit as i32,
                result: None,
                bytes_scanned,
                execution_time_ms: 0,
                error_message: reason,
                warning_message: String::new(),
            });
        }
        AdmissionDecision::Warn {
            bytes_scanned,
            message,
        } => {
            metrics::record_admission("warned");
            metrics::record_query("console", "warned", 0.0);
            record(EVENT_QUERY_WARNED, bytes_scanned, 0);
            return Ok(ExecuteQueryResponse {
                status: QueryStatus::WarningCost as i32,
                result: None,
                bytes_scanned,
                execution_time_ms: 0,
                error_message: String::new(),
                warning_message: message,
            });
        }
        AdmissionDecision::Allow { bytes_scanned } => {
            metrics::record_admission("allowed");
            bytes_scanned
        }
    };

    metrics::record_data_scanned(bytes_scanned);

    let row_limit = if req.row_limit > 0 {
        req.row_limit as usize
    } else {
        DEFAULT_ROW_LIMIT
    };

    let started = Instant::now();
    let run = async {
        let mut cursor = engine.execute(&req.instance_id, &req.sql).await?;
        marshal::marshal(cursor.as_mut(), row_limit).await
    };

    // The hard runtime guardrail bounds execution; zero disables it.
    let outcome = if config.hard_limit_runtime_ms > 0 {
        match tokio::time::timeout(
            Duration::from_millis(config.hard_limit_runtime_ms as u64),
            run,
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::QueryTimeout(config.hard_limit_runtime_ms)),
        }
    } else {
        run.await
    };

    let execution_time_ms = started.elapsed().as_millis() as i64;

    match outcome {
        Ok((preview, row_count)) => {
            debug!(%query_id, rows = row_count, execution_time_ms, "console query completed");
            metrics::record_query("console", "success", execution_time_ms as f64 / 1000.0);
            record(EVENT_QUERY_EXECUTED, bytes_scanned, execution_time_ms);

            let warning_message = if config.soft_limit_runtime_ms > 0
                && execution_time_ms >= config.soft_limit_runtime_ms
            {
                format!(
                    "query runtime of {} ms is at or above the soft runtime limit of {} ms",
                    execution_time_ms, config.soft_limit_runtime_ms
                )
            } else {
                String::new()
            };

            Ok(ExecuteQueryResponse {
                status: QueryStatus::Success as i32,
                result: Some(preview),
                bytes_scanned,
                execution_time_ms,
                error_message: String::new(),
                warning_message,
            })
        }
        Err(GatewayError::QueryCancelled) => Err(GatewayError::QueryCancelled),
        Err(err) => {
            warn!(%query_id, error = %err, "console query failed");
            metrics::record_query("console", "failed", execution_time_ms as f64 / 1000.0);
            record(EVENT_QUERY_FAILED, bytes_scanned, execution_time_ms);
            Ok(ExecuteQueryResponse {
                status: QueryStatus::Failed as i32,
                result: None,
                bytes_scanned,
                execution_time_ms,
                error_message: err.to_string(),
                warning_message: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::NoopActivityClient;
    use crate::guardrails::{HARD_LIMIT_BYTES_VAR, SOFT_LIMIT_BYTES_VAR};
    use crate::runtime::{CellValue, InstanceOptions};
    use crate::testutil::{
        console_runtime, static_descriptor, EstimateBehavior, RecordingActivityClient,
        StaticEngine, StaticResolver,
    };
    use meridian_common::proto::{CostEstimate, TypeCode};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn request(sql: &str) -> ExecuteQueryRequest {
        ExecuteQueryRequest {
            instance_id: "test-instance".to_string(),
            sql: sql.to_string(),
            row_limit: 0,
            confirm_cost_override: false,
            connector: String::new(),
        }
    }

    fn two_row_engine() -> StaticEngine {
        StaticEngine::new(
            "duckdb",
            vec![
                static_descriptor("id", TypeCode::Int64),
                static_descriptor("name", TypeCode::String),
            ],
            vec![
                vec![CellValue::Int(1), CellValue::String("alice".to_string())],
                vec![CellValue::Int(2), CellValue::String("bob".to_string())],
            ],
        )
    }

    fn guardrail_vars(soft: i64, hard: i64) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert(SOFT_LIMIT_BYTES_VAR.to_string(), soft.to_string());
        vars.insert(HARD_LIMIT_BYTES_VAR.to_string(), hard.to_string());
        vars
    }

    #[tokio::test]
    async fn success_returns_full_preview() {
        let runtime = console_runtime(two_row_engine(), HashMap::new());
        let resp = execute_query(
            &runtime,
            &NoopActivityClient,
            request("SELECT id, name FROM users"),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, QueryStatus::Success as i32);
        let preview = resp.result.unwrap();
        assert_eq!(preview.columns.len(), 2);
        assert_eq!(preview.rows.len(), 2);
        assert!(!preview.truncated);
        assert!(resp.execution_time_ms >= 0);
    }

    #[tokio::test]
    async fn empty_result_is_success() {
        let engine = StaticEngine::new(
            "duckdb",
            vec![static_descriptor("col1", TypeCode::String)],
            vec![],
        );
        let runtime = console_runtime(engine, HashMap::new());
        let resp = execute_query(
            &runtime,
            &NoopActivityClient,
            request("SELECT col1 FROM empty_table"),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, QueryStatus::Success as i32);
        let preview = resp.result.unwrap();
        assert!(preview.rows.is_empty());
        assert!(!preview.truncated);
    }

    #[tokio::test]
    async fn empty_sql_is_invalid_argument_without_collaborator_calls() {
        let engine = two_row_engine();
        let calls = engine.execute_calls();
        let runtime = console_runtime(engine, HashMap::new());
        let err = execute_query(&runtime, &NoopActivityClient, request(""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_instance_id_is_invalid_argument() {
        let runtime = console_runtime(two_row_engine(), HashMap::new());
        let mut req = request("SELECT 1");
        req.instance_id = String::new();
        let err = execute_query(&runtime, &NoopActivityClient, req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn driver_error_returns_failed_status_with_message() {
        let engine = two_row_engine().with_execute_error("syntax error at position 42");
        let runtime = console_runtime(engine, HashMap::new());
        let resp = execute_query(&runtime, &NoopActivityClient, request("SELEKT bad_sql"))
            .await
            .unwrap();
        assert_eq!(resp.status, QueryStatus::Failed as i32);
        assert!(resp.error_message.contains("syntax error"));
        assert!(resp.result.is_none());
    }

    #[tokio::test]
    async fn result_truncation_grid() {
        for (num_rows, row_limit, want_rows, want_truncated) in [
            (50usize, 100i64, 50usize, false),
            (100, 100, 100, false),
            (200, 100, 100, true),
            // limit 0 uses the configured default of 10k rows
            (150, 0, 150, false),
        ] {
            let rows: Vec<Vec<CellValue>> =
                (0..num_rows).map(|i| vec![CellValue::Int(i as i64)]).collect();
            let engine = StaticEngine::new(
                "duckdb",
                vec![static_descriptor("id", TypeCode::Int64)],
                rows,
            );
            let runtime = console_runtime(engine, HashMap::new());
            let mut req = request("SELECT id FROM big_table");
            req.row_limit = row_limit;

            let resp = execute_query(&runtime, &NoopActivityClient, req)
                .await
                .unwrap();
            assert_eq!(resp.status, QueryStatus::Success as i32);
            let preview = resp.result.unwrap();
            assert_eq!(preview.rows.len(), want_rows, "rows for {num_rows}/{row_limit}");
            assert_eq!(
                preview.truncated, want_truncated,
                "truncated for {num_rows}/{row_limit}"
            );
        }
    }

    #[tokio::test]
    async fn soft_limit_warns_and_skips_execution() {
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 600 * 1024 * 1024,
            supported: true,
        }));
        let calls = engine.execute_calls();
        let runtime = console_runtime(
            engine,
            guardrail_vars(500 * 1024 * 1024, 2 * 1024 * 1024 * 1024),
        );

        let resp = execute_query(
            &runtime,
            &NoopActivityClient,
            request("SELECT * FROM huge_table"),
        )
        .await
        .unwrap();

        assert_eq!(resp.status, QueryStatus::WarningCost as i32);
        assert!(resp.result.is_none());
        assert!(!resp.warning_message.is_empty());
        assert_eq!(resp.bytes_scanned, 600 * 1024 * 1024);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn soft_limit_override_executes() {
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 600 * 1024 * 1024,
            supported: true,
        }));
        let runtime = console_runtime(
            engine,
            guardrail_vars(500 * 1024 * 1024, 2 * 1024 * 1024 * 1024),
        );

        let mut req = request("SELECT * FROM huge_table");
        req.confirm_cost_override = true;
        let resp = execute_query(&runtime, &NoopActivityClient, req)
            .await
            .unwrap();

        assert_eq!(resp.status, QueryStatus::Success as i32);
        assert_eq!(resp.result.unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn hard_limit_blocks_even_with_override() {
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 5 * 1024 * 1024 * 1024,
            supported: true,
        }));
        let runtime = console_runtime(
            engine,
            guardrail_vars(500 * 1024 * 1024, 2 * 1024 * 1024 * 1024),
        );

        for confirm in [false, true] {
            let mut req = request("SELECT * FROM enormous_table");
            req.confirm_cost_override = confirm;
            let resp = execute_query(&runtime, &NoopActivityClient, req)
                .await
                .unwrap();
            assert_eq!(resp.status, QueryStatus::BlockedLimit as i32);
            assert!(resp.result.is_none());
            assert!(!resp.error_message.is_empty());
        }
    }

    #[tokio::test]
    async fn missing_estimator_skips_guardrails() {
        // Tiny limits, but the engine has no cost estimator: fail open.
        let runtime = console_runtime(two_row_engine(), guardrail_vars(1, 10));
        let resp = execute_query(&runtime, &NoopActivityClient, request("SELECT val FROM t"))
            .await
            .unwrap();
        assert_eq!(resp.status, QueryStatus::Success as i32);
        assert_eq!(resp.result.unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn estimation_error_proceeds_with_execution() {
        let engine = two_row_engine().with_estimate(EstimateBehavior::Error(
            "estimation service unavailable".to_string(),
        ));
        let runtime = console_runtime(engine, guardrail_vars(1, 0));
        let resp = execute_query(&runtime, &NoopActivityClient, request("SELECT v FROM t"))
            .await
            .unwrap();
        assert_eq!(resp.status, QueryStatus::Success as i32);
    }

    #[tokio::test]
    async fn unsupported_estimate_skips_guardrails() {
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 0,
            supported: false,
        }));
        let runtime = console_runtime(engine, guardrail_vars(1, 1));
        let resp = execute_query(&runtime, &NoopActivityClient, request("SELECT z FROM t"))
            .await
            .unwrap();
        assert_eq!(resp.status, QueryStatus::Success as i32);
    }

    #[tokio::test]
    async fn unknown_connector_hint_is_not_found() {
        let runtime = console_runtime(two_row_engine(), HashMap::new());
        let mut req = request("SELECT 1");
        req.connector = "clickhouse".to_string();
        let err = execute_query(&runtime, &NoopActivityClient, req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn telemetry_event_per_outcome() {
        // executed
        let activity = RecordingActivityClient::default();
        let runtime = console_runtime(two_row_engine(), HashMap::new());
        execute_query(&runtime, &activity, request("SELECT c FROM t"))
            .await
            .unwrap();
        let events = activity.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_QUERY_EXECUTED);
        assert_eq!(events[0].instance_id, "test-instance");

        // warned
        let activity = RecordingActivityClient::default();
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 600 * 1024 * 1024,
            supported: true,
        }));
        let runtime = console_runtime(
            engine,
            guardrail_vars(500 * 1024 * 1024, 2 * 1024 * 1024 * 1024),
        );
        execute_query(&runtime, &activity, request("SELECT * FROM big_table"))
            .await
            .unwrap();
        let events = activity.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_QUERY_WARNED);
        assert_eq!(events[0].bytes_scanned, 600 * 1024 * 1024);

        // blocked
        let activity = RecordingActivityClient::default();
        let engine = two_row_engine().with_estimate(EstimateBehavior::Estimate(CostEstimate {
            bytes_scanned: 10 * 1024 * 1024 * 1024,
            supported: true,
        }));
        let runtime = console_runtime(engine, guardrail_vars(0, 1024 * 1024 * 1024));
        execute_query(&runtime, &activity, request("SELECT * FROM enormous_table"))
            .await
            .unwrap();
        let events = activity.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_QUERY_BLOCKED);

        // failed
        let activity = RecordingActivityClient::default();
        let engine = two_row_engine().with_execute_error("relation does not exist");
        let runtime = console_runtime(engine, HashMap::new());
        execute_query(&runtime, &activity, request("SELECT * FROM nonexistent"))
            .await
            .unwrap();
        let events = activity.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EVENT_QUERY_FAILED);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_error() {
        let engine = two_row_engine().with_execute_cancelled();
        let runtime = console_runtime(engine, HashMap::new());
        let err = execute_query(&runtime, &NoopActivityClient, request("SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
    }

    #[tokio::test]
    async fn multiple_connectors_honor_the_hint() {
        use crate::runtime::{AllowAllAuthorizer, OlapEngine, Runtime};

        let runtime = Runtime::new(Arc::new(AllowAllAuthorizer));
        let mut engines: HashMap<String, Arc<dyn OlapEngine>> = HashMap::new();
        engines.insert("duckdb".to_string(), Arc::new(two_row_engine()));
        engines.insert(
            "clickhouse".to_string(),
            Arc::new(StaticEngine::new(
                "clickhouse",
                vec![static_descriptor("n", TypeCode::Int64)],
                vec![vec![CellValue::Int(9)]],
            )),
        );
        runtime.register_instance(InstanceOptions {
            instance_id: "test-instance".to_string(),
            variables: HashMap::new(),
            default_connector: "duckdb".to_string(),
            engines,
            resolver: Arc::new(StaticResolver::default()),
            catalog: Default::default(),
        });

        let mut req = request("SELECT n FROM t");
        req.connector = "clickhouse".to_string();
        let resp = execute_query(&runtime, &NoopActivityClient, req)
            .await
            .unwrap();
        let preview = resp.result.unwrap();
        assert_eq!(preview.rows.len(), 1);
        assert_eq!(preview.columns[0].name, "n");
    }
}
