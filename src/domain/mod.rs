// Domain layer: models, market calendar rules and ports (interfaces).

pub mod market_hours;
pub mod model;
pub mod numbers;
pub mod ports;
