//! Instance registry and collaborator contracts.
//!
//! The gateway never executes queries itself. Everything it serves is routed
//! through two collaborators consumed behind traits: a [`Resolver`] that
//! compiles a sub-query specification into a result cursor, and an
//! [`OlapEngine`] that executes raw SQL. Cost estimation is an optional
//! capability probed once per request via [`OlapEngine::cost_estimator`].
//!
//! Engines are pooled per instance; [`Runtime::olap`] hands out an
//! [`EngineLease`] whose drop releases the lease on every exit path.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use meridian_common::proto::{ColumnDescriptor, CostEstimate, SubQuery};
use meridian_common::{GatewayError, Result};

use crate::metrics;

/// Claims attached to a request, evaluated by the external auth system and
/// passed through to the resolver opaquely.
pub type Claims = HashMap<String, String>;

/// A single native cell value produced by a cursor, before marshaling.
/// Engine implementations may produce any variant; the remote frame decoder
/// only produces the wire-representable subset.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

/// A streaming result cursor: schema up front, rows on demand.
#[async_trait]
pub trait Cursor: Send {
    fn schema(&self) -> &[ColumnDescriptor];

    /// Next row, or `None` once the cursor is exhausted. A terminal error is
    /// surfaced here even if some rows were already consumed.
    async fn try_next(&mut self) -> Result<Option<Vec<CellValue>>>;
}

/// Optional cost-estimation capability of an OLAP engine.
#[async_trait]
pub trait CostEstimator: Send + Sync {
    async fn estimate_query_cost(&self, instance_id: &str, sql: &str) -> Result<CostEstimate>;
}

/// Handle to an OLAP execution backend.
#[async_trait]
pub trait OlapEngine: Send + Sync {
    /// Name of the connector this engine serves (e.g. "duckdb").
    fn connector(&self) -> &str;

    async fn execute(&self, instance_id: &str, sql: &str) -> Result<Box<dyn Cursor>>;

    /// Probe for the cost-estimation capability. Callers probe once per
    /// request and branch deterministically; `None` means admission control
    /// fails open.
    fn cost_estimator(&self) -> Option<&dyn CostEstimator> {
        None
    }
}

/// The resolver collaborator: compiles a sub-query specification into an
/// executable plan and streams back its result.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        instance_id: &str,
        query: &SubQuery,
        claims: &Claims,
    ) -> Result<Box<dyn Cursor>>;
}

/// Instance-scoped permissions consulted before any collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOlap,
    ReadMetrics,
}

/// Authorization capability, evaluated by the external auth system.
pub trait Authorizer: Send + Sync {
    fn can_instance(&self, instance_id: &str, permission: Permission) -> bool;
}

/// Grants everything. Used when the deployment delegates authorization to
/// the network boundary.
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn can_instance(&self, _instance_id: &str, _permission: Permission) -> bool {
        true
    }
}

/// One table known to an instance, used by the catalog introspection path.
#[allow(dead_code)]
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// Snapshot of an instance's queryable surface for catalog introspection.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub schemas: Vec<String>,
    pub tables: Vec<TableInfo>,
}

impl Default for CatalogSnapshot {
    fn default() -> Self {
        Self {
            schemas: vec!["public".to_string()],
            tables: Vec::new(),
        }
    }
}

/// Everything needed to register an instance with the runtime.
pub struct InstanceOptions {
    pub instance_id: String,
    /// Instance variables, e.g. guardrail limits. Read-only after register.
    pub variables: HashMap<String, String>,
    pub default_connector: String,
    pub engines: HashMap<String, Arc<dyn OlapEngine>>,
    pub resolver: Arc<dyn Resolver>,
    pub catalog: CatalogSnapshot,
}

struct Instance {
    variables: HashMap<String, String>,
    default_connector: String,
    engines: HashMap<String, Arc<dyn OlapEngine>>,
    resolver: Arc<dyn Resolver>,
    catalog: CatalogSnapshot,
}

/// Registry of instances and their collaborator handles.
pub struct Runtime {
    instances: DashMap<String, Arc<Instance>>,
    authorizer: Arc<dyn Authorizer>,
}

impl Runtime {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            instances: DashMap::new(),
            authorizer,
        }
    }

    pub fn register_instance(&self, opts: InstanceOptions) {
        self.instances.insert(
            opts.instance_id,
            Arc::new(Instance {
                variables: opts.variables,
                default_connector: opts.default_connector,
                engines: opts.engines,
                resolver: opts.resolver,
                catalog: opts.catalog,
            }),
        );
    }

    fn get(&self, instance_id: &str) -> Result<Arc<Instance>> {
        self.instances
            .get(instance_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("instance {:?} not found", instance_id)))
    }

    pub fn can_instance(&self, instance_id: &str, permission: Permission) -> bool {
        self.authorizer.can_instance(instance_id, permission)
    }

    /// Read-only snapshot of the instance variables for this request.
    pub fn instance_variables(&self, instance_id: &str) -> Result<HashMap<String, String>> {
        Ok(self.get(instance_id)?.variables.clone())
    }

    pub fn catalog(&self, instance_id: &str) -> Result<CatalogSnapshot> {
        Ok(self.get(instance_id)?.catalog.clone())
    }

    pub fn resolver(&self, instance_id: &str) -> Result<Arc<dyn Resolver>> {
        Ok(self.get(instance_id)?.resolver.clone())
    }

    /// Acquire the instance's OLAP engine, or the one named by `connector`.
    /// The returned lease releases itself when dropped.
    pub fn olap(&self, instance_id: &str, connector: Option<&str>) -> Result<EngineLease> {
        let instance = self.get(instance_id)?;
        let name = match connector {
            Some(c) if !c.is_empty() => c,
            _ => instance.default_connector.as_str(),
        };
        let engine = instance.engines.get(name).cloned().ok_or_else(|| {
            GatewayError::NotFound(format!(
                "connector {:?} not configured for instance {:?}",
                name, instance_id
            ))
        })?;
        Ok(EngineLease::acquire(engine))
    }
}

/// A scoped lease on an OLAP engine. Dereferences to the engine; releasing
/// happens in `Drop`, so it runs on success, error, and cancellation alike.
pub struct EngineLease {
    engine: Arc<dyn OlapEngine>,
    connector: String,
}

impl EngineLease {
    fn acquire(engine: Arc<dyn OlapEngine>) -> Self {
        let connector = engine.connector().to_string();
        metrics::engine_lease_acquired(&connector);
        Self { engine, connector }
    }
}

impl Deref for EngineLease {
    type Target = dyn OlapEngine;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        metrics::engine_lease_released(&self.connector);
    }
}

impl std::fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineLease")
            .field("connector", &self.connector)
            .finish()
    }
}
