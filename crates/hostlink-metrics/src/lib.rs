//! Exporter scraping and metrics extraction for the hostlink agent.

pub mod extract;
pub mod scrape;
pub mod text;

pub use extract::MetricsExtractor;
pub use scrape::ExporterClient;
