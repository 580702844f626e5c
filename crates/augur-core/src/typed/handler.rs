//! Handler trait - payload を受け取って locked section の中身を実行する
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::payload::TaskPayload;
use crate::domain::{InstrumentKey, TaskError, TaskKind};

/// Handler は型付き payload を処理する
///
/// 呼ばれる時点で `key` のロックは取得済み（wildcard なら全体の排他）。
#[async_trait]
pub trait Handler<T: TaskPayload>: Send + Sync {
    async fn handle(&self, key: InstrumentKey, payload: T) -> Result<(), TaskError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<TaskKind, Arc<dyn DynHandler>>` に格納するための層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        key: InstrumentKey,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), TaskError>;

    fn kind(&self) -> TaskKind;
}

pub struct TypedHandler<T: TaskPayload, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TaskPayload, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TaskPayload, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        key: InstrumentKey,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), TaskError> {
        let payload: T = serde_json::from_value(serde_json::Value::Object(payload)).map_err(|e| {
            TaskError::InvalidPayload {
                kind: T::KIND,
                message: e.to_string(),
            }
        })?;
        self.handler.handle(key, payload).await
    }

    fn kind(&self) -> TaskKind {
        T::KIND
    }
}
