//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is started per test binary and reused. Every test
//! gets its own freshly migrated database inside it, so reconciliation in one
//! test never sees another test's listings.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sync_core::kernel::test_dependencies::{MockListingFeed, MockListingRegistry};
use sync_core::kernel::{PgListingStore, SyncDeps, TestDependencies};
use sync_core::SyncSettings;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared test infrastructure that persists across all tests of a binary.
struct SharedTestInfra {
    server_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();
static NEXT_DATABASE: AtomicUsize = AtomicUsize::new(0);

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=sync_core=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let server_url = format!("postgresql://postgres:postgres@{}:{}", pg_host, pg_port);

        Ok(Self {
            server_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }

    /// Create and migrate a database no other test uses.
    async fn create_database(&self) -> Result<String> {
        let name = format!("sync_test_{}", NEXT_DATABASE.fetch_add(1, Ordering::SeqCst));

        let admin = PgPool::connect(&format!("{}/postgres", self.server_url))
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::query(&format!("CREATE DATABASE {}", name))
            .execute(&admin)
            .await
            .with_context(|| format!("Failed to create database {}", name))?;
        admin.close().await;

        Ok(format!("{}/{}", self.server_url, name))
    }
}

/// Test harness backed by a private Postgres database.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let store = ctx.store();
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    /// Database pool - use this for fixtures and assertions.
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
            .await
            .expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_url = infra.create_database().await?;

        let db_pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to test database")?;

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { db_pool })
    }

    pub fn store(&self) -> PgListingStore {
        PgListingStore::new(self.db_pool.clone())
    }

    /// Mocked feed and registry in front of this harness's database.
    pub fn deps(
        &self,
        feed: MockListingFeed,
        registry: MockListingRegistry,
        settings: SyncSettings,
    ) -> SyncDeps {
        SyncDeps::new(
            Arc::new(feed),
            Arc::new(registry),
            Arc::new(self.store()),
            settings,
        )
    }

    /// Pipeline settings with pacing delays removed.
    pub fn settings(&self) -> SyncSettings {
        TestDependencies::fast_settings()
    }
}
