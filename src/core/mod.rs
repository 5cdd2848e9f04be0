//! Core business logic abstractions

pub mod cache;
pub mod clock;
pub mod config;
pub mod earnings;
pub mod error;
pub mod log;
pub mod model;
pub mod price;
pub mod repository;

// Re-export main types for cleaner imports
pub use cache::KeyValueCollection;
pub use clock::{Clock, ManualClock, SystemClock};
pub use earnings::Earnings;
pub use error::{Error, Result};
pub use price::{PriceProvider, SourceKind};
pub use repository::PortfolioRepository;
