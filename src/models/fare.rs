use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ride::RideClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: Decimal,
    pub distance_cost: Decimal,
    pub stops_fee: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub ride_class: RideClass,
    pub distance_km: f64,
    pub amount: Decimal,
    pub breakdown: FareBreakdown,
}
