//! In-memory collaborator doubles shared across test modules.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meridian_common::proto::sub_query::Kind;
use meridian_common::proto::{
    ColumnDescriptor, CostEstimate, MetricsToplistRequest, SubQuery, TypeCode,
};
use meridian_common::{GatewayError, Result};

use crate::activity::{ActivityClient, ActivityEvent};
use crate::marshal::cell_to_text;
use crate::runtime::{
    AllowAllAuthorizer, CellValue, Claims, CostEstimator, Cursor, InstanceOptions, OlapEngine,
    Resolver, Runtime,
};

pub fn static_descriptor(name: &str, code: TypeCode) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        type_code: code as i32,
        array_element_type_code: TypeCode::Unspecified as i32,
        nullable: true,
    }
}

fn float_descriptor(name: &str) -> ColumnDescriptor {
    static_descriptor(name, TypeCode::Float64)
}

/// Cursor over a fixed set of rows, optionally failing at the end.
pub struct StaticCursor {
    schema: Vec<ColumnDescriptor>,
    rows: VecDeque<Vec<CellValue>>,
    terminal_error: Option<String>,
}

impl StaticCursor {
    pub fn new(schema: Vec<ColumnDescriptor>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            schema,
            rows: rows.into(),
            terminal_error: None,
        }
    }

    pub fn with_terminal_error(mut self, message: &str) -> Self {
        self.terminal_error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Cursor for StaticCursor {
    fn schema(&self) -> &[ColumnDescriptor] {
        &self.schema
    }

    async fn try_next(&mut self) -> Result<Option<Vec<CellValue>>> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some(row)),
            None => match self.terminal_error.take() {
                Some(message) => Err(GatewayError::QueryExecutionFailed(message)),
                None => Ok(None),
            },
        }
    }
}

/// How a [`StaticEngine`] answers cost estimation.
pub enum EstimateBehavior {
    Error(String),
    Estimate(CostEstimate),
}

/// In-memory OLAP engine returning a fixed result set.
pub struct StaticEngine {
    connector: String,
    schema: Vec<ColumnDescriptor>,
    rows: Vec<Vec<CellValue>>,
    execute_error: Option<String>,
    execute_cancelled: bool,
    estimate: Option<EstimateBehavior>,
    execute_calls: Arc<AtomicUsize>,
}

impl StaticEngine {
    pub fn new(
        connector: &str,
        schema: Vec<ColumnDescriptor>,
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        Self {
            connector: connector.to_string(),
            schema,
            rows,
            execute_error: None,
            execute_cancelled: false,
            estimate: None,
            execute_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_estimate(mut self, estimate: EstimateBehavior) -> Self {
        self.estimate = Some(estimate);
        self
    }

    pub fn with_execute_error(mut self, message: &str) -> Self {
        self.execute_error = Some(message.to_string());
        self
    }

    pub fn with_execute_cancelled(mut self) -> Self {
        self.execute_cancelled = true;
        self
    }

    pub fn execute_calls(&self) -> Arc<AtomicUsize> {
        self.execute_calls.clone()
    }
}

#[async_trait]
impl OlapEngine for StaticEngine {
    fn connector(&self) -> &str {
        &self.connector
    }

    async fn execute(&self, _instance_id: &str, _sql: &str) -> Result<Box<dyn Cursor>> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if self.execute_cancelled {
            return Err(GatewayError::QueryCancelled);
        }
        if let Some(message) = &self.execute_error {
            return Err(GatewayError::QueryExecutionFailed(message.clone()));
        }
        Ok(Box::new(StaticCursor::new(
            self.schema.clone(),
            self.rows.clone(),
        )))
    }

    fn cost_estimator(&self) -> Option<&dyn CostEstimator> {
        self.estimate.as_ref().map(|_| self as &dyn CostEstimator)
    }
}

#[async_trait]
impl CostEstimator for StaticEngine {
    async fn estimate_query_cost(&self, _instance_id: &str, _sql: &str) -> Result<CostEstimate> {
        match self.estimate.as_ref().expect("estimator probed without behavior") {
            EstimateBehavior::Error(message) => {
                Err(GatewayError::EstimationFailed(message.clone()))
            }
            EstimateBehavior::Estimate(estimate) => Ok(estimate.clone()),
        }
    }
}

type Table = (Vec<ColumnDescriptor>, Vec<Vec<CellValue>>);

/// In-memory resolver evaluating sub-queries against registered tables.
#[derive(Default)]
pub struct StaticResolver {
    tables: HashMap<String, Table>,
}

impl StaticResolver {
    pub fn with_table(
        mut self,
        name: &str,
        schema: Vec<ColumnDescriptor>,
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        self.tables.insert(name.to_string(), (schema, rows));
        self
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(format!("table {:?} not found", name)))
    }
}

fn col_index(schema: &[ColumnDescriptor], name: &str) -> Result<usize> {
    schema
        .iter()
        .position(|column| column.name == name)
        .ok_or_else(|| {
            GatewayError::QueryExecutionFailed(format!(
                "Referenced column \"{}\" not found",
                name
            ))
        })
}

fn as_f64(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Int(v) => *v as f64,
        CellValue::UInt(v) => *v as f64,
        CellValue::Float(v) => *v,
        _ => 0.0,
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(
        &self,
        _instance_id: &str,
        query: &SubQuery,
        _claims: &Claims,
    ) -> Result<Box<dyn Cursor>> {
        let kind = query
            .kind
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidArgument("sub-query has no kind".to_string()))?;

        let cursor: StaticCursor = match kind {
            Kind::MetricsToplistRequest(req) => {
                let (schema, rows) = self.table(&req.metrics_view)?;
                let dim = col_index(schema, &req.dimension)?;
                let measure_name = req.measures.first().cloned().unwrap_or_default();
                let measure = col_index(schema, &measure_name)?;
                StaticCursor::new(
                    vec![schema[dim].clone(), schema[measure].clone()],
                    rows.iter()
                        .map(|row| vec![row[dim].clone(), row[measure].clone()])
                        .collect(),
                )
            }
            Kind::MetricsAggregationRequest(req) => {
                let (schema, rows) = self.table(&req.metrics_view)?;
                let mut indices = Vec::new();
                for name in req.dimensions.iter().chain(req.measures.iter()) {
                    indices.push(col_index(schema, name)?);
                }
                let mut out: Vec<Vec<CellValue>> = rows
                    .iter()
                    .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                    .collect();
                if req.limit > 0 {
                    out.truncate(req.limit as usize);
                }
                StaticCursor::new(
                    indices.iter().map(|&i| schema[i].clone()).collect(),
                    out,
                )
            }
            Kind::MetricsTotalsRequest(req) => {
                let (schema, rows) = self.table(&req.metrics_view)?;
                let mut totals = Vec::new();
                let mut columns = Vec::new();
                for name in &req.measures {
                    let index = col_index(schema, name)?;
                    columns.push(float_descriptor(name));
                    totals.push(CellValue::Float(
                        rows.iter().map(|row| as_f64(&row[index])).sum(),
                    ));
                }
                StaticCursor::new(columns, vec![totals])
            }
            Kind::ColumnTopKRequest(req) => {
                let (schema, rows) = self.table(&req.table_name)?;
                let index = col_index(schema, &req.column_name)?;
                let mut counts: BTreeMap<String, f64> = BTreeMap::new();
                for row in rows {
                    let key = cell_to_text(&row[index]).unwrap_or_else(|| "NULL".to_string());
                    *counts.entry(key).or_insert(0.0) += 1.0;
                }
                let mut entries: Vec<(String, f64)> = counts.into_iter().collect();
                entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
                if req.k > 0 {
                    entries.truncate(req.k as usize);
                }
                StaticCursor::new(
                    vec![
                        static_descriptor("value", TypeCode::String),
                        float_descriptor("count"),
                    ],
                    entries
                        .into_iter()
                        .map(|(value, count)| {
                            vec![CellValue::String(value), CellValue::Float(count)]
                        })
                        .collect(),
                )
            }
            Kind::ColumnNullCountRequest(req) => {
                let (schema, rows) = self.table(&req.table_name)?;
                let index = col_index(schema, &req.column_name)?;
                let count = rows
                    .iter()
                    .filter(|row| matches!(row[index], CellValue::Null))
                    .count() as f64;
                StaticCursor::new(
                    vec![float_descriptor("count")],
                    vec![vec![CellValue::Float(count)]],
                )
            }
            Kind::ColumnCardinalityRequest(req) => {
                let (schema, rows) = self.table(&req.table_name)?;
                let index = col_index(schema, &req.column_name)?;
                let distinct: std::collections::HashSet<String> = rows
                    .iter()
                    .filter_map(|row| cell_to_text(&row[index]))
                    .collect();
                StaticCursor::new(
                    vec![float_descriptor("cardinality")],
                    vec![vec![CellValue::Float(distinct.len() as f64)]],
                )
            }
            Kind::TableCardinalityRequest(req) => {
                let (_, rows) = self.table(&req.table_name)?;
                StaticCursor::new(
                    vec![static_descriptor("cardinality", TypeCode::Int64)],
                    vec![vec![CellValue::Int(rows.len() as i64)]],
                )
            }
            Kind::TableColumnsRequest(req) => {
                let (schema, _) = self.table(&req.table_name)?;
                StaticCursor::new(schema.clone(), Vec::new())
            }
            Kind::TableRowsRequest(req) => {
                let (schema, rows) = self.table(&req.table_name)?;
                let mut out = rows.clone();
                if req.limit > 0 {
                    out.truncate(req.limit as usize);
                }
                StaticCursor::new(schema.clone(), out)
            }
            Kind::AnalyticSqlRequest(req) => {
                // No SQL engine here: resolve against the named logical
                // source, falling back to a sole registered table.
                let table = match self.tables.get(&req.source) {
                    Some(table) => table,
                    None if self.tables.len() == 1 => self.tables.values().next().unwrap(),
                    None => {
                        return Err(GatewayError::NotFound(format!(
                            "source {:?} not found",
                            req.source
                        )))
                    }
                };
                StaticCursor::new(table.0.clone(), table.1.clone())
            }
        };

        Ok(Box::new(cursor))
    }
}

/// The canonical two-row test dataset.
pub fn ad_bids_resolver() -> StaticResolver {
    StaticResolver::default().with_table(
        "ad_bids",
        vec![
            static_descriptor("domain", TypeCode::String),
            static_descriptor("publisher", TypeCode::String),
            static_descriptor("bid_price", TypeCode::Float64),
            static_descriptor("timestamp", TypeCode::Timestamp),
        ],
        vec![
            vec![
                CellValue::String("facebook.com".to_string()),
                CellValue::Null,
                CellValue::Float(1.5),
                CellValue::String("2022-01-01 00:00:00.000".to_string()),
            ],
            vec![
                CellValue::String("google.com".to_string()),
                CellValue::String("Google".to_string()),
                CellValue::Float(2.5),
                CellValue::String("2022-01-02 00:00:00.000".to_string()),
            ],
        ],
    )
}

pub fn toplist_entry(view: &str, dimension: &str, measure: &str) -> Kind {
    Kind::MetricsToplistRequest(MetricsToplistRequest {
        metrics_view: view.to_string(),
        dimension: dimension.to_string(),
        measures: vec![measure.to_string()],
        sort_measure: measure.to_string(),
        ascending: false,
        limit: 0,
    })
}

/// Runtime with a single instance "test-instance" backed by the given
/// engine and an empty resolver.
pub fn console_runtime(engine: StaticEngine, variables: HashMap<String, String>) -> Runtime {
    let runtime = Runtime::new(Arc::new(AllowAllAuthorizer));
    let connector = engine.connector().to_string();
    let mut engines: HashMap<String, Arc<dyn OlapEngine>> = HashMap::new();
    engines.insert(connector.clone(), Arc::new(engine));
    runtime.register_instance(InstanceOptions {
        instance_id: "test-instance".to_string(),
        variables,
        default_connector: connector,
        engines,
        resolver: Arc::new(StaticResolver::default()),
        catalog: Default::default(),
    });
    runtime
}

/// Records events for assertions.
#[derive(Default)]
pub struct RecordingActivityClient {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingActivityClient {
    pub fn take(&self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl ActivityClient for RecordingActivityClient {
    fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}
