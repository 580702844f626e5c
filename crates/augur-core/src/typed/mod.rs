//! Typed - 型付き payload API
//!
//! TaskKind の取り違えを型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskPayload` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod handler;
pub mod payload;
pub mod registry;

pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::payload::{PriceUpdate, Recalibrate, TaskPayload};
pub use self::registry::{RegistryError, TypedRegistry};
