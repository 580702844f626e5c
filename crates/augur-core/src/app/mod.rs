//! App - アプリケーション層
//!
//! ports と lock coordinator を組み合わせて task の処理を実装します。
//!
//! # 主要コンポーネント
//! - **DispatcherBuilder**: handler 登録と coordinator のワイヤリング
//! - **Dispatcher**: task → handler 解決 → key ロック下で実行 → 失敗の分類
//! - **ScoreHandler**: 履歴 + 感情カウントから予測スコアを算出して保存
//! - **WorkerGroup**: transport から lease して dispatch / settle するループ
//! - **LoadHarness**: 人工レイテンシで 2 つのロック戦略を比較

pub mod builder;
pub mod dispatcher;
pub mod load_harness;
pub mod score_handler;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, DispatcherBuilder};
pub use self::dispatcher::Dispatcher;
pub use self::load_harness::{
    ComparisonReport, LatencyProfile, LatencyRange, LoadHarness, StrategyRun, synthetic_batch,
};
pub use self::score_handler::ScoreHandler;
pub use self::worker::WorkerGroup;
