pub mod lookup;
pub mod stock;

pub use lookup::RepositoryCatalog;
pub use stock::StockConsumer;
