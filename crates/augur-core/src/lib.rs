//! augur-core
//!
//! Per-instrument prediction scoring behind a key lock coordinator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, attempt, errors, retry, decision, score）
//! - **ports**: 抽象化レイヤー（ScoreHistory, PredictionStore）
//! - **lock**: KeyCoordinator と 2 つの戦略（blocking / cooperative）
//! - **typed**: 型付き payload API（TaskPayload, Handler, TypedRegistry）
//! - **app**: アプリケーションロジック（builder, dispatcher, score handler, worker, load harness）
//! - **impls**: 開発用の実装（InMemoryScoreStore, InMemoryTransport）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod lock;
pub mod ports;
pub mod typed;
