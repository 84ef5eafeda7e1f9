//! Remote data providers and the table they produce.

pub mod circuit_breaker;
pub mod eastmoney;
pub mod provider;
pub mod table;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use eastmoney::EastmoneyDealProvider;
pub use provider::{
    DataError, DataSource, FetchProgress, FetchRequest, HttpOptions, SilentProgress,
    StdoutProgress, TableProvider,
};
pub use table::{Cell, Column, ColumnValues, Table};
pub use yahoo::YahooProvider;
