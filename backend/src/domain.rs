use std::sync::Arc;

use shared::{Card, CardKey, NewCard};
use tracing::info;

use crate::storage::{CardStore, StorageResult};

/// Card operations exposed to the HTTP layer. Holds the one store selected
/// at startup; cloning shares it.
#[derive(Clone)]
pub struct CardService {
    store: Arc<dyn CardStore>,
}

impl CardService {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self { store }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn list_cards(&self) -> StorageResult<Vec<Card>> {
        let cards = self.store.read_all().await?;
        info!("Returning {} cards from {}", cards.len(), self.backend_name());
        Ok(cards)
    }

    pub async fn create_card(&self, card: NewCard) -> StorageResult<Card> {
        info!("Creating card: {}", card.name);
        let created = self.store.create(card).await?;
        info!("Created card {} with id {}", created.name, created.id);
        Ok(created)
    }

    pub async fn update_card(&self, card: &Card) -> StorageResult<()> {
        info!("Updating card {}", card.id);
        self.store.update(card).await
    }

    pub async fn delete_card(&self, key: CardKey) -> StorageResult<()> {
        info!("Deleting card {}", key.id);
        self.store.delete(key.id).await
    }
}
