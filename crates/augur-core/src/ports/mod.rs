//! Ports - 外部 collaborator への抽象化レイヤー
//!
//! core が外から受け取るのは「過去スコアの読み出し」と「新スコアの書き込み」だけ。
//! 永続化のスキーマや ORM はここでは扱わない。

pub mod prediction_store;
pub mod score_history;

pub use self::prediction_store::PredictionStore;
pub use self::score_history::ScoreHistory;
