//! Route pricing strategies

use meshwork_types::{parse_units, AmountResult, TokenAmount};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::error::PricingError;

/// The parts of a request a price may depend on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub content_length: Option<u64>,
}

pub type DynamicPriceFn =
    Arc<dyn Fn(&RequestInfo) -> Result<TokenAmount, PricingError> + Send + Sync>;

/// How much a paid route costs
#[derive(Clone)]
pub enum Pricing {
    /// Same price for every request
    Fixed(TokenAmount),
    /// `base × multiplier`
    PerRequest { base: TokenAmount, multiplier: u64 },
    /// Computed from the request; failures fall back to the configured price
    Dynamic(DynamicPriceFn),
}

impl Pricing {
    pub fn fixed(minor_units: u128) -> Self {
        Pricing::Fixed(TokenAmount(minor_units))
    }

    /// Fixed price from a decimal string such as `"0.01"`
    pub fn fixed_decimal(text: &str, decimals: u8) -> AmountResult<Self> {
        Ok(Pricing::Fixed(parse_units(text, decimals)?))
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&RequestInfo) -> Result<TokenAmount, PricingError> + Send + Sync + 'static,
    {
        Pricing::Dynamic(Arc::new(f))
    }

    pub fn evaluate(&self, request: &RequestInfo) -> Result<TokenAmount, PricingError> {
        match self {
            Pricing::Fixed(amount) => Ok(*amount),
            Pricing::PerRequest { base, multiplier } => {
                Ok(base.saturating_mul(u128::from(*multiplier)))
            }
            Pricing::Dynamic(f) => f(request),
        }
    }

    /// Evaluate, substituting `fallback` when a dynamic price fails
    pub fn resolve(&self, request: &RequestInfo, fallback: TokenAmount) -> TokenAmount {
        match self.evaluate(request) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(
                    path = %request.path,
                    error = %e,
                    fallback = %fallback,
                    "Dynamic pricing failed, using fallback price"
                );
                fallback
            }
        }
    }
}

impl fmt::Debug for Pricing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pricing::Fixed(amount) => f.debug_tuple("Fixed").field(amount).finish(),
            Pricing::PerRequest { base, multiplier } => f
                .debug_struct("PerRequest")
                .field("base", base)
                .field("multiplier", multiplier)
                .finish(),
            Pricing::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_per_request() {
        let req = RequestInfo::default();
        assert_eq!(Pricing::fixed(500).evaluate(&req).unwrap(), TokenAmount(500));

        let per = Pricing::PerRequest {
            base: TokenAmount(1_000),
            multiplier: 3,
        };
        assert_eq!(per.evaluate(&req).unwrap(), TokenAmount(3_000));
    }

    #[test]
    fn per_request_saturates() {
        let per = Pricing::PerRequest {
            base: TokenAmount(u128::MAX),
            multiplier: 2,
        };
        assert_eq!(per.evaluate(&RequestInfo::default()).unwrap(), TokenAmount(u128::MAX));
    }

    #[test]
    fn dynamic_uses_request() {
        let pricing = Pricing::dynamic(|req| {
            Ok(TokenAmount(u128::from(req.content_length.unwrap_or(0)) * 10))
        });
        let req = RequestInfo {
            content_length: Some(42),
            ..Default::default()
        };
        assert_eq!(pricing.resolve(&req, TokenAmount(1)), TokenAmount(420));
    }

    #[test]
    fn dynamic_failure_falls_back() {
        let pricing =
            Pricing::dynamic(|_| Err(PricingError::Unavailable("oracle offline".into())));
        assert_eq!(
            pricing.resolve(&RequestInfo::default(), TokenAmount(7_500)),
            TokenAmount(7_500)
        );
    }

    #[test]
    fn fixed_decimal_parses() {
        let pricing = Pricing::fixed_decimal("0.01", 6).unwrap();
        assert_eq!(pricing.evaluate(&RequestInfo::default()).unwrap(), TokenAmount(10_000));
    }
}
