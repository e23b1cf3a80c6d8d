pub mod gateway;
pub mod provider_http;
pub mod rate_limit;

pub use gateway::{MarketDataGateway, MarketDataProvider};
pub use provider_http::HttpProvider;
