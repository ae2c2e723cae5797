pub mod cache_service;
pub mod chart_service;
pub mod event_hub;
pub mod pair_locator;
pub mod price_reconstructor;
pub mod repair_service;
pub mod reserve_lookup;

pub use cache_service::{CacheService, CacheStats};
pub use chart_service::ChartService;
pub use event_hub::EventHub;
pub use pair_locator::{PairLocator, StablecoinList, TokenClassifier};
pub use price_reconstructor::UsdPrice;
pub use repair_service::{RepairReport, RepairScope, RepairService};
