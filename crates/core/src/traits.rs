use crate::venue::*;
use async_trait::async_trait;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Venue Client Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the venue.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VenueError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// The async operations the adapter consumes from the venue.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn list_products(&self) -> Result<Vec<Product>, VenueError>;

    async fn list_market_prices(&self, product_ids: &[Uuid]) -> Result<Vec<MarketPrice>, VenueError>;

    /// Subaccounts owned by `sender`.
    async fn list_subaccounts(&self, sender: &str) -> Result<Vec<Subaccount>, VenueError>;

    async fn get_subaccount_balances(
        &self,
        subaccount_id: Uuid,
    ) -> Result<Vec<SubaccountBalance>, VenueError>;

    /// Open positions of a subaccount.
    async fn list_positions(&self, subaccount_id: Uuid) -> Result<Vec<VenuePosition>, VenueError>;

    async fn list_fills(&self, query: &FillQuery) -> Result<Vec<Fill>, VenueError>;

    async fn list_orders(&self, subaccount_id: Uuid) -> Result<Vec<VenueOrder>, VenueError>;

    /// Fails with [`VenueError::NotFound`] for an unknown id.
    async fn get_order(&self, order_id: Uuid) -> Result<VenueOrder, VenueError>;

    async fn get_projected_funding(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<ProjectedFunding>, VenueError>;

    async fn create_order(&self, order: &OrderSubmission) -> Result<VenueOrder, VenueError>;

    /// Returns the ids the venue accepted for cancellation.
    async fn cancel_orders(&self, request: &CancelRequest) -> Result<Vec<Uuid>, VenueError>;

    /// Release client resources. Default no-op.
    async fn close(&self) -> Result<(), VenueError> {
        Ok(())
    }
}
