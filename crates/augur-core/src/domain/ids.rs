//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type でラップして、`InstrumentKey` と
//! `DeliveryId` を型レベルで区別します。
//!
//! ## Wildcard key
//! nil ULID（全ビット 0）は予約済みの「全銘柄を排他的に対象とする」キーです。
//! `InstrumentKey::WILDCARD` として公開しています。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"inst-", "delivery-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh time-ordered id.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the prefixed display form and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Instrument (ticker) のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Instrument {}

impl IdMarker for Instrument {
    fn prefix() -> &'static str {
        "inst-"
    }
}

/// Delivery (transport 上の 1 論理メッセージ) のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Delivery {}

impl IdMarker for Delivery {
    fn prefix() -> &'static str {
        "delivery-"
    }
}

/// Identifier of one coordinated resource (an instrument).
pub type InstrumentKey = Id<Instrument>;

/// Identifier of one logical message inside the in-memory transport.
pub type DeliveryId = Id<Delivery>;

impl Id<Instrument> {
    /// The reserved all-zero key: exclusive access to every instrument.
    pub const WILDCARD: InstrumentKey = Id::from_ulid(Ulid::nil());

    pub fn is_wildcard(&self) -> bool {
        self.ulid.is_nil()
    }
}
