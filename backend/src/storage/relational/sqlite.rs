use async_trait::async_trait;
use shared::{Card, NewCard};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite};
use tracing::{debug, info};

use super::{DELETE_CARD, INSERT_CARD, SELECT_CARDS, UPDATE_CARD};
use crate::storage::{CardStore, StorageError, StorageResult};

const BACKEND: &str = "sqlite";

/// SQLite-backed card store
#[derive(Clone)]
pub struct SqliteCardStore {
    pool: SqlitePool,
}

impl SqliteCardStore {
    /// Connect to the database at `url`, creating the file if it doesn't exist
    pub async fn new(url: &str, max_connections: u32) -> StorageResult<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            info!("Creating SQLite database at {}", url);
            Sqlite::create_database(url)
                .await
                .map_err(|e| StorageError::connection(BACKEND, e))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| StorageError::connection(BACKEND, e))?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database with the schema in place
    #[cfg(test)]
    pub async fn init_test() -> StorageResult<Self> {
        let test_id = uuid::Uuid::new_v4().to_string();
        let db_url = format!("sqlite:file:memdb_{}?mode=memory&cache=shared", test_id);

        let store = Self::new(&db_url, 1).await?;
        store.ensure_schema().await?;
        Ok(store)
    }
}

fn card_from_row(row: &SqliteRow) -> Result<Card, sqlx::Error> {
    Ok(Card {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        level: row.try_get::<Option<i64>, _>("level")?.unwrap_or_default(),
        attribute: row.try_get::<Option<String>, _>("attribute")?.unwrap_or_default(),
        race: row.try_get::<Option<String>, _>("race")?.unwrap_or_default(),
        attack: row.try_get::<Option<i64>, _>("attack")?.unwrap_or_default(),
        defense: row.try_get::<Option<i64>, _>("defense")?.unwrap_or_default(),
        effect: row.try_get::<Option<String>, _>("effect")?.unwrap_or_default(),
    })
}

#[async_trait]
impl CardStore for SqliteCardStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                level INTEGER,
                attribute TEXT,
                race TEXT,
                attack INTEGER,
                defense INTEGER,
                effect TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, card: NewCard) -> StorageResult<Card> {
        let result = sqlx::query(INSERT_CARD)
            .bind(&card.name)
            .bind(card.level)
            .bind(&card.attribute)
            .bind(&card.race)
            .bind(card.attack)
            .bind(card.defense)
            .bind(&card.effect)
            .execute(&self.pool)
            .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted card {} with rowid {}", card.name, id);
        Ok(card.with_id(id))
    }

    async fn read_all(&self) -> StorageResult<Vec<Card>> {
        let rows = sqlx::query(SELECT_CARDS).fetch_all(&self.pool).await?;
        let cards = rows
            .iter()
            .map(card_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    async fn update(&self, card: &Card) -> StorageResult<()> {
        sqlx::query(UPDATE_CARD)
            .bind(&card.name)
            .bind(card.level)
            .bind(&card.attribute)
            .bind(&card.race)
            .bind(card.attack)
            .bind(card.defense)
            .bind(&card.effect)
            .bind(card.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StorageResult<()> {
        sqlx::query(DELETE_CARD)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}
