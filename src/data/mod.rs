/// Data layer: core types, loading, cleaning and CSV output.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet bytes
///        │
///        ▼
///   ┌──────────┐
///   │  loader  │  parse bytes → Table
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  clean   │  drop identifiers + null rows, one-hot categoricals
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer  │  Table → canonical CSV bytes
///   └──────────┘
/// ```
pub mod clean;
pub mod loader;
pub mod model;
pub mod writer;
