//! Benefit resolver trait — the billing/entitlement service boundary.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Benefit;

/// Returns the current benefits of every known user.
#[async_trait]
pub trait BenefitResolver: Send + Sync {
    /// Resolver name for logging.
    fn name(&self) -> &str;

    async fn list_benefits(&self) -> Result<Vec<Benefit>>;
}
