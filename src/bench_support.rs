use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clinic_quota_service::{
    create_router,
    storage::{ClientRecord, StaffUserRecord},
    ApiState, ClinicDatabase, IdentifierService, Plan, PlanLimits, QuotaEnforcer,
    QuotaServiceConfig, Tenant, TenantStatus,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub use clinic_quota_service;
pub use clinic_sequence_id;
pub use serde_json;

pub const BENCH_PLAN_ID: &str = "bench-plan";

/// An enforcer and identifier service over a tenant seeded in a temp database.
pub struct QuotaBenchFixture {
    pub database: Arc<ClinicDatabase>,
    pub enforcer: QuotaEnforcer,
    pub identifiers: IdentifierService,
    pub tenant_id: String,
    pub temp_dir: TempDir,
}

impl QuotaBenchFixture {
    pub fn new(tenant_id: &str, limits: PlanLimits) -> Self {
        let temp_dir = TempDir::new().expect("tempdir");
        let database = Arc::new(
            ClinicDatabase::new(temp_dir.path().to_path_buf()).expect("clinic database"),
        );

        database
            .upsert_plan(&Plan {
                plan_id: BENCH_PLAN_ID.to_string(),
                name: "Bench".to_string(),
                limits,
            })
            .expect("bench plan stored");

        let now = Utc::now().to_rfc3339();
        database
            .create_tenant(&Tenant {
                tenant_id: tenant_id.to_string(),
                name: format!("Bench clinic {tenant_id}"),
                plan_id: BENCH_PLAN_ID.to_string(),
                status: TenantStatus::Active,
                storage_used_mb: 0.0,
                created_at: now.clone(),
                updated_at: now,
            })
            .expect("bench tenant stored");

        let enforcer = QuotaEnforcer::new(database.clone(), database.clone());
        let identifiers = IdentifierService::new(Arc::clone(&database));

        Self {
            database,
            enforcer,
            identifiers,
            tenant_id: tenant_id.to_string(),
            temp_dir,
        }
    }

    pub fn with_staff(self, count: usize) -> Self {
        for idx in 0..count {
            self.database
                .insert_staff_user(&StaffUserRecord {
                    user_id: format!("{}-staff-{idx}", self.tenant_id),
                    tenant_id: self.tenant_id.clone(),
                    name: format!("Staff {idx}"),
                    email: format!("staff{idx}@bench.test"),
                    role: "vet".to_string(),
                    created_at: Utc::now().to_rfc3339(),
                })
                .expect("staff seeded");
        }
        self
    }

    pub fn with_clients(self, count: usize) -> Self {
        for idx in 0..count {
            self.database
                .insert_client(&ClientRecord {
                    client_id: format!("{}-client-{idx}", self.tenant_id),
                    tenant_id: self.tenant_id.clone(),
                    client_number: format!("B-{idx:06}"),
                    name: format!("Owner {idx}"),
                    created_at: Utc::now().to_rfc3339(),
                })
                .expect("client seeded");
        }
        self
    }
}

/// A quota service bound to an ephemeral local port.
pub struct RunningService {
    pub base_url: String,
    pub data_dir: TempDir,
    handle: JoinHandle<()>,
}

impl RunningService {
    pub async fn start() -> Result<Self> {
        let data_dir = TempDir::new().context("failed to create service data dir")?;
        let config = QuotaServiceConfig {
            data_dir: data_dir.path().to_path_buf(),
            ..QuotaServiceConfig::default()
        };
        let database = Arc::new(ClinicDatabase::new(config.data_dir.clone())?);
        let router = create_router(Arc::new(ApiState::new(database, config)));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind ephemeral port")?;
        let addr: SocketAddr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router.into_make_service()).await {
                tracing::error!(error = %err, "test quota service stopped");
            }
        });

        info!(%addr, "test quota service listening");
        Ok(Self {
            base_url: format!("http://{addr}"),
            data_dir,
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for RunningService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn plan_payload(plan_id: &str, max_users: i64, max_clients: i64, max_storage_gb: f64) -> Value {
    json!({
        "plan_id": plan_id,
        "name": plan_id,
        "max_users": max_users,
        "max_clients": max_clients,
        "max_storage_gb": max_storage_gb,
    })
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}
