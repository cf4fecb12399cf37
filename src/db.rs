use crate::config::Config;
use crate::models::{Channel, LineUser, Message, RichMenu, StepScenario, Tag};
use anyhow::Result;
use deadpool::Runtime;
use diesel::prelude::*;
use diesel::{Connection, OptionalExtension, PgConnection};
use diesel_async::{
    pooled_connection::{AsyncDieselConnectionManager, PoolError},
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use tracing::info;

pub type DbPool = deadpool::managed::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;
pub type DbConnection = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Privileged database capability: full access across tenants. Handed to
/// the webhook processor and the sweep engines by construction; operator
/// request paths go through [`TenantDb`] instead.
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database manager with connection pool
    pub async fn new() -> Result<Self> {
        let config = Config::get();
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database.url);

        let pool = DbPool::builder(manager)
            .max_size(config.database.max_connections as usize)
            .runtime(Runtime::Tokio1)
            .build()?;

        let db = Self { pool };

        // Test connection and run migrations
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize the database by testing connection and running migrations
    async fn initialize(&self) -> Result<()> {
        let _conn = self.get_connection().await?;
        info!("Successfully connected to the database");

        self.run_migrations()?;

        Ok(())
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let config = Config::get();
        let mut conn = PgConnection::establish(&config.database.url)?;

        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("failed to run migrations: {}", e))?;
        info!("Database migrations applied successfully");

        Ok(())
    }

    /// Get a database connection from the pool
    pub async fn get_connection(&self) -> Result<DbConnection, deadpool::managed::PoolError<PoolError>> {
        self.pool.get().await
    }
}

/// Initialize database connection pool and run migrations
pub async fn init_database() -> Result<Database> {
    Database::new().await
}

/// Tenant-scoped database capability: every lookup is filtered by the
/// wrapped channel id, so an operator request can never read or act on
/// another tenant's rows. Constructed per request from the routed channel.
pub struct TenantDb {
    db: Arc<Database>,
    channel_id: i32,
}

impl TenantDb {
    pub fn new(db: Arc<Database>, channel_id: i32) -> Self {
        Self { db, channel_id }
    }

    pub async fn channel(&self) -> Result<Option<Channel>> {
        use crate::schema::channels;
        let mut conn = self.db.get_connection().await?;
        Ok(channels::table
            .find(self.channel_id)
            .first::<Channel>(&mut conn)
            .await
            .optional()?)
    }

    pub async fn line_user(&self, user_id: i32) -> Result<Option<LineUser>> {
        use crate::schema::line_users;
        let mut conn = self.db.get_connection().await?;
        Ok(line_users::table
            .find(user_id)
            .filter(line_users::channel_id.eq(self.channel_id))
            .first::<LineUser>(&mut conn)
            .await
            .optional()?)
    }

    pub async fn tag(&self, tag_id: i32) -> Result<Option<Tag>> {
        use crate::schema::tags;
        let mut conn = self.db.get_connection().await?;
        Ok(tags::table
            .find(tag_id)
            .filter(tags::channel_id.eq(self.channel_id))
            .first::<Tag>(&mut conn)
            .await
            .optional()?)
    }

    pub async fn rich_menu(&self, menu_id: i32) -> Result<Option<RichMenu>> {
        use crate::schema::rich_menus;
        let mut conn = self.db.get_connection().await?;
        Ok(rich_menus::table
            .find(menu_id)
            .filter(rich_menus::channel_id.eq(self.channel_id))
            .first::<RichMenu>(&mut conn)
            .await
            .optional()?)
    }

    pub async fn scenario(&self, scenario_id: i32) -> Result<Option<StepScenario>> {
        use crate::schema::step_scenarios;
        let mut conn = self.db.get_connection().await?;
        Ok(step_scenarios::table
            .find(scenario_id)
            .filter(step_scenarios::channel_id.eq(self.channel_id))
            .first::<StepScenario>(&mut conn)
            .await
            .optional()?)
    }

    pub async fn message(&self, message_id: i32) -> Result<Option<Message>> {
        use crate::schema::messages;
        let mut conn = self.db.get_connection().await?;
        Ok(messages::table
            .find(message_id)
            .filter(messages::channel_id.eq(self.channel_id))
            .first::<Message>(&mut conn)
            .await
            .optional()?)
    }
}
