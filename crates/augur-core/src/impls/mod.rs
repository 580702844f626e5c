//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryScoreStore**: `ScoreHistory` + `PredictionStore`
//! - **InMemoryTransport**: at-least-once の配送 transport（dead-letter holding 付き）

pub mod inmem_store;
pub mod inmem_transport;

pub use self::inmem_store::InMemoryScoreStore;
pub use self::inmem_transport::{
    DeliveryState, DeliveryStatus, InMemoryTransport, Lease, TransportCounts,
};
