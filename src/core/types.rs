//! Host-side value objects mirroring engine descriptors
//!
//! Everything here is plain owned data: the session hands these to callers and
//! keeps no copy. Conversion to and from the engine's native layout lives in
//! [`crate::core::native`].
//!
//! # Example
//!
//! ```
//! use wfkit::core::layers::{FIELD_IP_REMOTE_PORT, LAYER_ALE_AUTH_CONNECT_V4};
//! use wfkit::core::types::{Action, Match, MatchType, MatchValue, Rule, RuleId};
//!
//! let rule = Rule {
//!     id: RuleId::new_v4(),
//!     name: "Allow HTTPS".to_string(),
//!     layer: LAYER_ALE_AUTH_CONNECT_V4,
//!     weight: 0x4242,
//!     conditions: vec![Match {
//!         field: FIELD_IP_REMOTE_PORT,
//!         op: MatchType::Equal,
//!         value: MatchValue::U16(443),
//!     }],
//!     action: Action::Permit,
//!     ..Rule::default()
//! };
//! assert!(rule.action.is_terminating());
//! ```

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::BitOr;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! guid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// The all-zero identifier, used by the engine as "unset".
            pub const NIL: Self = Self(Uuid::nil());

            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_u128(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.braced())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

guid_id!(
    /// Identifies a filtering layer.
    LayerId
);
guid_id!(
    /// Identifies a sublayer within the engine's arbitration order.
    SublayerId
);
guid_id!(
    /// Identifies a provider (the owner tag attached to engine objects).
    ProviderId
);
guid_id!(
    /// Identifies a rule (an engine filter).
    RuleId
);
guid_id!(
    /// Identifies a condition field within a layer.
    FieldId
);
guid_id!(
    /// Identifies a callout driver registered with the engine.
    CalloutId
);

/// Data types the engine understands for field and condition values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum DataType {
    Empty,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    ByteArray16,
    ByteBlob,
    Sid,
    SecurityDescriptor,
    UnicodeString,
    V4AddrMask,
    V6AddrMask,
    Range,
}

impl DataType {
    pub const fn code(self) -> u32 {
        match self {
            DataType::Empty => 0,
            DataType::Uint8 => 1,
            DataType::Uint16 => 2,
            DataType::Uint32 => 3,
            DataType::Uint64 => 4,
            DataType::ByteArray16 => 11,
            DataType::ByteBlob => 12,
            DataType::Sid => 13,
            DataType::SecurityDescriptor => 14,
            DataType::UnicodeString => 17,
            DataType::V4AddrMask => 0x100,
            DataType::V6AddrMask => 0x101,
            DataType::Range => 0x102,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => DataType::Empty,
            1 => DataType::Uint8,
            2 => DataType::Uint16,
            3 => DataType::Uint32,
            4 => DataType::Uint64,
            11 => DataType::ByteArray16,
            12 => DataType::ByteBlob,
            13 => DataType::Sid,
            14 => DataType::SecurityDescriptor,
            17 => DataType::UnicodeString,
            0x100 => DataType::V4AddrMask,
            0x101 => DataType::V6AddrMask,
            0x102 => DataType::Range,
            _ => return None,
        })
    }
}

/// Comparison applied between a packet field and a condition value.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum MatchType {
    #[default]
    Equal,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Range,
    FlagsAllSet,
    FlagsAnySet,
    FlagsNoneSet,
    EqualCaseInsensitive,
    NotEqual,
    Prefix,
    NotPrefix,
}

impl MatchType {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => MatchType::Equal,
            1 => MatchType::Greater,
            2 => MatchType::Less,
            3 => MatchType::GreaterOrEqual,
            4 => MatchType::LessOrEqual,
            5 => MatchType::Range,
            6 => MatchType::FlagsAllSet,
            7 => MatchType::FlagsAnySet,
            8 => MatchType::FlagsNoneSet,
            9 => MatchType::EqualCaseInsensitive,
            10 => MatchType::NotEqual,
            11 => MatchType::Prefix,
            12 => MatchType::NotPrefix,
            _ => return None,
        })
    }
}

/// Value a condition compares against.
///
/// IPv4 addresses are `U32` in host order and IPv6 addresses are `Bytes16`,
/// matching the engine's field types; use `Network` for address/mask pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MatchValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bytes16([u8; 16]),
    Bytes(Vec<u8>),
    Sid(Vec<u8>),
    SecurityDescriptor(Vec<u8>),
    String(String),
    Network(IpNetwork),
    Range(Box<MatchValue>, Box<MatchValue>),
}

impl MatchValue {
    pub fn range(low: impl Into<MatchValue>, high: impl Into<MatchValue>) -> Self {
        MatchValue::Range(Box::new(low.into()), Box::new(high.into()))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            MatchValue::U8(_) => DataType::Uint8,
            MatchValue::U16(_) => DataType::Uint16,
            MatchValue::U32(_) => DataType::Uint32,
            MatchValue::U64(_) => DataType::Uint64,
            MatchValue::Bytes16(_) => DataType::ByteArray16,
            MatchValue::Bytes(_) => DataType::ByteBlob,
            MatchValue::Sid(_) => DataType::Sid,
            MatchValue::SecurityDescriptor(_) => DataType::SecurityDescriptor,
            MatchValue::String(_) => DataType::UnicodeString,
            MatchValue::Network(IpNetwork::V4(_)) => DataType::V4AddrMask,
            MatchValue::Network(IpNetwork::V6(_)) => DataType::V6AddrMask,
            MatchValue::Range(..) => DataType::Range,
        }
    }
}

impl fmt::Display for MatchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchValue::U8(v) => write!(f, "{v}"),
            MatchValue::U16(v) => write!(f, "{v}"),
            MatchValue::U32(v) => write!(f, "{v}"),
            MatchValue::U64(v) => write!(f, "{v}"),
            MatchValue::Bytes16(v) => write!(f, "{}", Ipv6Addr::from(*v)),
            MatchValue::Bytes(v) | MatchValue::Sid(v) | MatchValue::SecurityDescriptor(v) => {
                write!(f, "<{} bytes>", v.len())
            }
            MatchValue::String(v) => write!(f, "{v:?}"),
            MatchValue::Network(v) => write!(f, "{v}"),
            MatchValue::Range(low, high) => write!(f, "{low}..={high}"),
        }
    }
}

impl From<u8> for MatchValue {
    fn from(value: u8) -> Self {
        MatchValue::U8(value)
    }
}

impl From<u16> for MatchValue {
    fn from(value: u16) -> Self {
        MatchValue::U16(value)
    }
}

impl From<u32> for MatchValue {
    fn from(value: u32) -> Self {
        MatchValue::U32(value)
    }
}

impl From<u64> for MatchValue {
    fn from(value: u64) -> Self {
        MatchValue::U64(value)
    }
}

impl From<&str> for MatchValue {
    fn from(value: &str) -> Self {
        MatchValue::String(value.to_string())
    }
}

impl From<String> for MatchValue {
    fn from(value: String) -> Self {
        MatchValue::String(value)
    }
}

impl From<IpNetwork> for MatchValue {
    fn from(value: IpNetwork) -> Self {
        MatchValue::Network(value)
    }
}

impl From<Ipv4Addr> for MatchValue {
    fn from(value: Ipv4Addr) -> Self {
        MatchValue::U32(u32::from(value))
    }
}

impl From<Ipv6Addr> for MatchValue {
    fn from(value: Ipv6Addr) -> Self {
        MatchValue::Bytes16(value.octets())
    }
}

/// One rule condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub field: FieldId,
    pub op: MatchType,
    pub value: MatchValue,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

const ACTION_FLAG_TERMINATING: u32 = 0x1000;
const ACTION_FLAG_NON_TERMINATING: u32 = 0x2000;
const ACTION_FLAG_CALLOUT: u32 = 0x4000;

/// What the engine does with traffic that matches a rule.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    #[default]
    Block,
    Permit,
    CalloutTerminating,
    CalloutInspection,
    CalloutUnknown,
}

impl Action {
    pub const fn code(self) -> u32 {
        match self {
            Action::Block => 0x0001 | ACTION_FLAG_TERMINATING,
            Action::Permit => 0x0002 | ACTION_FLAG_TERMINATING,
            Action::CalloutTerminating => 0x0003 | ACTION_FLAG_CALLOUT | ACTION_FLAG_TERMINATING,
            Action::CalloutInspection => {
                0x0004 | ACTION_FLAG_CALLOUT | ACTION_FLAG_NON_TERMINATING
            }
            Action::CalloutUnknown => 0x0005 | ACTION_FLAG_CALLOUT,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x1001 => Action::Block,
            0x1002 => Action::Permit,
            0x5003 => Action::CalloutTerminating,
            0x6004 => Action::CalloutInspection,
            0x4005 => Action::CalloutUnknown,
            _ => return None,
        })
    }

    pub const fn is_callout(self) -> bool {
        self.code() & ACTION_FLAG_CALLOUT != 0
    }

    pub const fn is_terminating(self) -> bool {
        self.code() & ACTION_FLAG_TERMINATING != 0
    }
}

/// Mask over action type bits, used to select rules by action during
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionFlag(pub u32);

impl ActionFlag {
    pub const TERMINATING: Self = Self(ACTION_FLAG_TERMINATING);
    pub const NON_TERMINATING: Self = Self(ACTION_FLAG_NON_TERMINATING);
    pub const CALLOUT: Self = Self(ACTION_FLAG_CALLOUT);
    /// All bits set: the engine ignores the action type.
    pub const IGNORE: Self = Self(u32::MAX);

    /// True if a rule with `action` passes this mask.
    pub const fn selects(self, action: Action) -> bool {
        self.0 == u32::MAX || action.code() & self.0 != 0
    }
}

impl Default for ActionFlag {
    fn default() -> Self {
        Self::IGNORE
    }
}

impl BitOr for ActionFlag {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How an enumeration template's conditions relate to rule conditions.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum FilterEnumType {
    FullyContained,
    #[default]
    Overlapping,
}

impl FilterEnumType {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FilterEnumType::FullyContained),
            1 => Some(FilterEnumType::Overlapping),
            _ => None,
        }
    }
}

const FILTER_ENUM_FLAG_NAMES: [&str; 6] = [
    "BestTerminatingMatch",
    "Sorted",
    "BootTimeOnly",
    "IncludeBootTime",
    "IncludeDisabled",
    "Reserved1",
];

/// Modifiers applied to rule enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterEnumFlags(pub u32);

impl FilterEnumFlags {
    pub const NONE: Self = Self(0);
    pub const BEST_TERMINATING_MATCH: Self = Self(1);
    pub const SORTED: Self = Self(1 << 1);
    pub const BOOT_TIME_ONLY: Self = Self(1 << 2);
    pub const INCLUDE_BOOT_TIME: Self = Self(1 << 3);
    pub const INCLUDE_DISABLED: Self = Self(1 << 4);
    pub const RESERVED1: Self = Self(1 << 5);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FilterEnumFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for FilterEnumFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = FILTER_ENUM_FLAG_NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| (self.0 >> bit) & 1 == 1)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "FilterEnumFlags({})", names.join("|"))
    }
}

/// Access requested when beginning a transaction.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum TransactionFlags {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl TransactionFlags {
    pub const fn code(self) -> u32 {
        match self {
            TransactionFlags::ReadWrite => 0,
            TransactionFlags::ReadOnly => 1,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        if code & 1 == 1 {
            TransactionFlags::ReadOnly
        } else {
            TransactionFlags::ReadWrite
        }
    }
}

/// A field that conditions in a layer may test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub data_type: DataType,
}

/// A filtering layer: a point in the network stack where rules apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub kernel_id: u16,
    pub name: String,
    pub description: String,
    pub default_sublayer: SublayerId,
    pub fields: Vec<Field>,
}

impl Layer {
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// An owner tag for engine objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A weighted container that arbitrates between groups of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sublayer {
    pub id: SublayerId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub provider: Option<ProviderId>,
    #[serde(default)]
    pub provider_data: Vec<u8>,
    pub weight: u16,
}

/// A filtering rule.
///
/// A nil `id` asks the engine to assign one; a nil `sublayer` places the rule
/// in the layer's default sublayer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    /// Engine-assigned runtime identifier; ignored when adding.
    #[serde(default)]
    pub kernel_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub layer: LayerId,
    #[serde(default)]
    pub sublayer: SublayerId,
    pub weight: u64,
    #[serde(default)]
    pub conditions: Vec<Match>,
    pub action: Action,
    /// Required when `action` is a callout action.
    #[serde(default)]
    pub callout: Option<CalloutId>,
    #[serde(default)]
    pub permit_if_callout_missing: bool,
    /// Clears the action override right so lower-weight sublayers cannot veto.
    #[serde(default)]
    pub hard_action: bool,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub boot_time: bool,
    #[serde(default)]
    pub provider: Option<ProviderId>,
    #[serde(default)]
    pub provider_data: Vec<u8>,
    #[serde(default)]
    pub disabled: bool,
}
