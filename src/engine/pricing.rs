use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;
use ulid::Ulid;

use crate::collaborators::CustomPricing;

use super::SchedulingError;

/// Where a resolved price came from, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Explicit,
    ProviderCustom,
    ServiceDefault,
}

/// First defined price in precedence order. Negative prices are rejected
/// whichever source they come from.
pub fn pick_price(
    explicit: Option<Decimal>,
    custom: Option<Decimal>,
    default: Decimal,
) -> Result<(Decimal, PriceSource), SchedulingError> {
    let (price, source) = match (explicit, custom) {
        (Some(p), _) => (p, PriceSource::Explicit),
        (None, Some(p)) => (p, PriceSource::ProviderCustom),
        (None, None) => (default, PriceSource::ServiceDefault),
    };
    if price.is_sign_negative() && !price.is_zero() {
        return Err(SchedulingError::Validation(format!(
            "price must not be negative ({source:?}: {price})"
        )));
    }
    // -0 is stored as 0.
    let price = if price.is_zero() { Decimal::ZERO } else { price };
    Ok((price, source))
}

pub struct PriceResolver {
    custom: Arc<dyn CustomPricing>,
}

impl PriceResolver {
    pub fn new(custom: Arc<dyn CustomPricing>) -> Self {
        Self { custom }
    }

    /// Custom pricing is only consulted when the caller didn't name a price.
    pub async fn resolve(
        &self,
        explicit: Option<Decimal>,
        provider_id: Ulid,
        service_id: Ulid,
        default: Decimal,
    ) -> Result<Decimal, SchedulingError> {
        let custom = match explicit {
            Some(_) => None,
            None => self.custom.custom_price(provider_id, service_id).await?,
        };
        let (price, source) = pick_price(explicit, custom, default)?;
        debug!("price {price} for provider {provider_id} service {service_id} from {source:?}");
        Ok(price)
    }
}
