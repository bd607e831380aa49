//! Native-layout engine descriptors
//!
//! Engine calls take `#[repr(C)]` descriptor trees by address. Every type here
//! is built inside an [`Arena`] and borrows from it for `'a`, so a descriptor
//! cannot outlive the storage its pointers refer to.
//!
//! Builders (`new_in`) convert host values from [`crate::core::types`];
//! decoders (`to_rule`, `to_provider`, ...) convert back and are what an
//! [`Engine`](crate::core::engine::Engine) implementation uses to read a call's
//! arguments. Fields are private: the only way to obtain a descriptor is a
//! builder, which is what makes the pointer reads in the decoders sound.
//!
//! Variable-length parts (strings, blobs, condition arrays) must each fit in
//! one arena slab; builders report oversized input as a validation error
//! rather than tripping the arena's panic.

use std::marker::PhantomData;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ptr::NonNull;
use std::slice;
use std::time::Duration;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use uuid::Uuid;

use crate::core::arena::Arena;
use crate::core::enumerate::RuleQuery;
use crate::core::error::{EngineError, Error, Result};
use crate::core::types::{
    Action, ActionFlag, CalloutId, DataType, FilterEnumFlags, FilterEnumType, Match, MatchType,
    MatchValue, Provider, ProviderId, Rule, Sublayer,
};

pub const SESSION_FLAG_DYNAMIC: u32 = 0x1;

pub const PROVIDER_FLAG_PERSISTENT: u32 = 0x1;
pub const PROVIDER_FLAG_DISABLED: u32 = 0x10;

pub const SUBLAYER_FLAG_PERSISTENT: u32 = 0x1;

pub const FILTER_FLAG_PERSISTENT: u32 = 0x1;
pub const FILTER_FLAG_BOOTTIME: u32 = 0x2;
pub const FILTER_FLAG_CLEAR_ACTION_RIGHT: u32 = 0x8;
pub const FILTER_FLAG_PERMIT_IF_CALLOUT_UNREGISTERED: u32 = 0x10;
pub const FILTER_FLAG_DISABLED: u32 = 0x20;

/// Engine GUID layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl From<Uuid> for Guid {
    fn from(value: Uuid) -> Self {
        let (data1, data2, data3, data4) = value.as_fields();
        Self {
            data1,
            data2,
            data3,
            data4: *data4,
        }
    }
}

impl From<Guid> for Uuid {
    fn from(value: Guid) -> Self {
        Uuid::from_fields(value.data1, value.data2, value.data3, &value.data4)
    }
}

fn guid(id: impl Into<Uuid>) -> Guid {
    Guid::from(id.into())
}

fn optional_guid<'a>(arena: &'a Arena, id: Option<impl Into<Uuid>>) -> Option<&'a Guid> {
    id.map(|id| &*arena.alloc(guid(id)))
}

fn ensure_fits(arena: &Arena, field: &str, bytes: usize) -> Result<()> {
    if bytes > arena.slab_size() {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!(
                "{bytes} bytes exceeds the {} byte descriptor limit",
                arena.slab_size()
            ),
        });
    }
    Ok(())
}

/// NUL-terminated UTF-16 string. An empty host string is stored as null.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct WideStr<'a> {
    ptr: Option<NonNull<u16>>,
    _marker: PhantomData<&'a [u16]>,
}

impl<'a> WideStr<'a> {
    pub const NULL: Self = Self {
        ptr: None,
        _marker: PhantomData,
    };

    pub fn new_in(arena: &'a Arena, field: &str, s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::NULL);
        }
        let mut units: Vec<u16> = s.encode_utf16().collect();
        units.push(0);
        ensure_fits(arena, field, units.len() * 2)?;
        let stored: &[u16] = arena.alloc_slice_copy(&units);
        Ok(Self {
            ptr: Some(NonNull::from(stored).cast()),
            _marker: PhantomData,
        })
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Decodes the string; `None` for a null pointer.
    pub fn to_string_lossy(&self) -> Option<String> {
        let ptr = self.ptr?;
        // SAFETY: non-null WideStrs are only made by new_in, which copies a
        // NUL-terminated buffer into an arena that outlives 'a.
        unsafe {
            let mut len = 0;
            while *ptr.as_ptr().add(len) != 0 {
                len += 1;
            }
            Some(String::from_utf16_lossy(slice::from_raw_parts(
                ptr.as_ptr(),
                len,
            )))
        }
    }

    fn to_owned_or_empty(self) -> String {
        self.to_string_lossy().unwrap_or_default()
    }
}

/// Length-prefixed byte buffer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ByteBlob<'a> {
    size: u32,
    data: Option<NonNull<u8>>,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> ByteBlob<'a> {
    pub const EMPTY: Self = Self {
        size: 0,
        data: None,
        _marker: PhantomData,
    };

    pub fn new_in(arena: &'a Arena, field: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::EMPTY);
        }
        ensure_fits(arena, field, bytes.len())?;
        let stored: &[u8] = arena.alloc_slice_copy(bytes);
        Ok(Self {
            size: stored.len() as u32,
            data: Some(NonNull::from(stored).cast()),
            _marker: PhantomData,
        })
    }

    pub fn as_slice(&self) -> &'a [u8] {
        match self.data {
            None => &[],
            // SAFETY: set by new_in from an arena copy of exactly `size` bytes.
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.size as usize) },
        }
    }
}

/// Name and description shown by engine tooling.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DisplayData<'a> {
    name: WideStr<'a>,
    description: WideStr<'a>,
}

impl<'a> DisplayData<'a> {
    pub fn new_in(arena: &'a Arena, name: &str, description: &str) -> Result<Self> {
        Ok(Self {
            name: WideStr::new_in(arena, "name", name)?,
            description: WideStr::new_in(arena, "description", description)?,
        })
    }

    pub fn name(&self) -> String {
        self.name.to_owned_or_empty()
    }

    pub fn description(&self) -> String {
        self.description.to_owned_or_empty()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V4AddrAndMask {
    addr: u32,
    mask: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct V6AddrAndMask {
    addr: [u8; 16],
    prefix_length: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Range<'a> {
    low: Value<'a>,
    high: Value<'a>,
}

#[repr(C)]
#[derive(Clone, Copy)]
union ValueData<'a> {
    uint8: u8,
    uint16: u16,
    uint32: u32,
    uint64: &'a u64,
    byte_array16: &'a [u8; 16],
    byte_blob: &'a ByteBlob<'a>,
    unicode_string: WideStr<'a>,
    v4_addr_mask: &'a V4AddrAndMask,
    v6_addr_mask: &'a V6AddrAndMask,
    range: &'a Range<'a>,
}

/// Tagged value: the engine's generic value and condition value layout.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Value<'a> {
    data_type: u32,
    data: ValueData<'a>,
}

impl<'a> Value<'a> {
    pub const EMPTY: Self = Self {
        data_type: 0,
        data: ValueData { uint32: 0 },
    };

    pub fn uint64_in(arena: &'a Arena, value: u64) -> Self {
        Self {
            data_type: DataType::Uint64.code(),
            data: ValueData {
                uint64: arena.alloc(value),
            },
        }
    }

    pub fn new_in(arena: &'a Arena, value: &MatchValue) -> Result<Self> {
        Self::build(arena, value, true)
    }

    fn build(arena: &'a Arena, value: &MatchValue, allow_range: bool) -> Result<Self> {
        let data = match value {
            MatchValue::U8(v) => ValueData { uint8: *v },
            MatchValue::U16(v) => ValueData { uint16: *v },
            MatchValue::U32(v) => ValueData { uint32: *v },
            MatchValue::U64(v) => ValueData {
                uint64: arena.alloc(*v),
            },
            MatchValue::Bytes16(v) => ValueData {
                byte_array16: arena.alloc(*v),
            },
            MatchValue::Bytes(v) | MatchValue::Sid(v) | MatchValue::SecurityDescriptor(v) => {
                ValueData {
                    byte_blob: arena.alloc(ByteBlob::new_in(arena, "condition value", v)?),
                }
            }
            MatchValue::String(v) => ValueData {
                unicode_string: WideStr::new_in(arena, "condition value", v)?,
            },
            MatchValue::Network(IpNetwork::V4(net)) => ValueData {
                v4_addr_mask: arena.alloc(V4AddrAndMask {
                    addr: u32::from(net.ip()),
                    mask: u32::from(net.mask()),
                }),
            },
            MatchValue::Network(IpNetwork::V6(net)) => ValueData {
                v6_addr_mask: arena.alloc(V6AddrAndMask {
                    addr: net.ip().octets(),
                    prefix_length: net.prefix(),
                }),
            },
            MatchValue::Range(low, high) => {
                if !allow_range {
                    return Err(Error::Validation {
                        field: "condition value".to_string(),
                        message: "ranges cannot be nested".to_string(),
                    });
                }
                ValueData {
                    range: arena.alloc(Range {
                        low: Self::build(arena, low, false)?,
                        high: Self::build(arena, high, false)?,
                    }),
                }
            }
        };
        Ok(Self {
            data_type: value.data_type().code(),
            data,
        })
    }

    pub fn data_type(&self) -> Option<DataType> {
        DataType::from_code(self.data_type)
    }

    /// Reads a `Uint64` value.
    pub fn as_u64(&self) -> Option<u64> {
        match self.data_type() {
            // SAFETY: the tag says the uint64 member was written.
            Some(DataType::Uint64) => Some(unsafe { *self.data.uint64 }),
            _ => None,
        }
    }

    /// Decodes to a host value; `Ok(None)` for an empty value.
    pub fn decode(&self) -> std::result::Result<Option<MatchValue>, EngineError> {
        self.decode_inner(true)
    }

    fn decode_inner(
        &self,
        allow_range: bool,
    ) -> std::result::Result<Option<MatchValue>, EngineError> {
        let Some(data_type) = self.data_type() else {
            return Err(EngineError::TypeMismatch);
        };
        // SAFETY: every arm reads the union member its tag names; values are
        // only constructed by `build`, which writes that member.
        let value = unsafe {
            match data_type {
                DataType::Empty => return Ok(None),
                DataType::Uint8 => MatchValue::U8(self.data.uint8),
                DataType::Uint16 => MatchValue::U16(self.data.uint16),
                DataType::Uint32 => MatchValue::U32(self.data.uint32),
                DataType::Uint64 => MatchValue::U64(*self.data.uint64),
                DataType::ByteArray16 => MatchValue::Bytes16(*self.data.byte_array16),
                DataType::ByteBlob => MatchValue::Bytes(self.data.byte_blob.as_slice().to_vec()),
                DataType::Sid => MatchValue::Sid(self.data.byte_blob.as_slice().to_vec()),
                DataType::SecurityDescriptor => {
                    MatchValue::SecurityDescriptor(self.data.byte_blob.as_slice().to_vec())
                }
                DataType::UnicodeString => {
                    MatchValue::String(self.data.unicode_string.to_owned_or_empty())
                }
                DataType::V4AddrMask => {
                    let v4 = self.data.v4_addr_mask;
                    let net = Ipv4Network::with_netmask(
                        Ipv4Addr::from(v4.addr),
                        Ipv4Addr::from(v4.mask),
                    )
                    .map_err(|_| EngineError::TypeMismatch)?;
                    MatchValue::Network(IpNetwork::V4(net))
                }
                DataType::V6AddrMask => {
                    let v6 = self.data.v6_addr_mask;
                    let net = Ipv6Network::new(Ipv6Addr::from(v6.addr), v6.prefix_length)
                        .map_err(|_| EngineError::TypeMismatch)?;
                    MatchValue::Network(IpNetwork::V6(net))
                }
                DataType::Range => {
                    if !allow_range {
                        return Err(EngineError::TypeMismatch);
                    }
                    let range = self.data.range;
                    let low = range.low.decode_inner(false)?;
                    let high = range.high.decode_inner(false)?;
                    match (low, high) {
                        (Some(low), Some(high)) => MatchValue::Range(Box::new(low), Box::new(high)),
                        _ => return Err(EngineError::TypeMismatch),
                    }
                }
            }
        };
        Ok(Some(value))
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FilterCondition<'a> {
    field_key: Guid,
    match_type: u32,
    condition_value: Value<'a>,
}

impl<'a> FilterCondition<'a> {
    fn new_in(arena: &'a Arena, condition: &Match) -> Result<Self> {
        Ok(Self {
            field_key: guid(condition.field),
            match_type: condition.op.code(),
            condition_value: Value::new_in(arena, &condition.value)?,
        })
    }

    pub fn to_match(&self) -> std::result::Result<Match, EngineError> {
        let op = MatchType::from_code(self.match_type).ok_or(EngineError::TypeMismatch)?;
        let value = self
            .condition_value
            .decode()?
            .ok_or(EngineError::TypeMismatch)?;
        Ok(Match {
            field: Uuid::from(self.field_key).into(),
            op,
            value,
        })
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ActionDescriptor {
    action_type: u32,
    callout_key: Guid,
}

/// Filter (rule) descriptor passed to add-filter.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FilterDescriptor<'a> {
    filter_key: Guid,
    display_data: DisplayData<'a>,
    flags: u32,
    provider_key: Option<&'a Guid>,
    provider_data: ByteBlob<'a>,
    layer_key: Guid,
    sublayer_key: Guid,
    weight: Value<'a>,
    num_filter_conditions: u32,
    filter_condition: Option<NonNull<FilterCondition<'a>>>,
    action: ActionDescriptor,
    _marker: PhantomData<&'a [FilterCondition<'a>]>,
}

impl<'a> FilterDescriptor<'a> {
    pub fn new_in(arena: &'a Arena, rule: &Rule) -> Result<&'a Self> {
        let mut flags = 0;
        for (set, bit) in [
            (rule.persistent, FILTER_FLAG_PERSISTENT),
            (rule.boot_time, FILTER_FLAG_BOOTTIME),
            (rule.hard_action, FILTER_FLAG_CLEAR_ACTION_RIGHT),
            (
                rule.permit_if_callout_missing,
                FILTER_FLAG_PERMIT_IF_CALLOUT_UNREGISTERED,
            ),
            (rule.disabled, FILTER_FLAG_DISABLED),
        ] {
            if set {
                flags |= bit;
            }
        }

        let conditions = rule
            .conditions
            .iter()
            .map(|c| FilterCondition::new_in(arena, c))
            .collect::<Result<Vec<_>>>()?;
        let filter_condition = if conditions.is_empty() {
            None
        } else {
            ensure_fits(
                arena,
                "conditions",
                conditions.len() * std::mem::size_of::<FilterCondition<'_>>(),
            )?;
            let stored: &[FilterCondition<'a>] = arena.alloc_slice_copy(&conditions);
            Some(NonNull::from(stored).cast())
        };

        Ok(arena.alloc(Self {
            filter_key: guid(rule.id),
            display_data: DisplayData::new_in(arena, &rule.name, &rule.description)?,
            flags,
            provider_key: optional_guid(arena, rule.provider),
            provider_data: ByteBlob::new_in(arena, "provider_data", &rule.provider_data)?,
            layer_key: guid(rule.layer),
            sublayer_key: guid(rule.sublayer),
            weight: Value::uint64_in(arena, rule.weight),
            num_filter_conditions: conditions.len() as u32,
            filter_condition,
            action: ActionDescriptor {
                action_type: rule.action.code(),
                callout_key: rule.callout.map(guid).unwrap_or_default(),
            },
            _marker: PhantomData,
        }))
    }

    pub fn conditions(&self) -> &'a [FilterCondition<'a>] {
        match self.filter_condition {
            None => &[],
            // SAFETY: set by new_in from an arena slice of exactly
            // num_filter_conditions elements.
            Some(ptr) => unsafe {
                slice::from_raw_parts(ptr.as_ptr(), self.num_filter_conditions as usize)
            },
        }
    }

    pub fn to_rule(&self) -> std::result::Result<Rule, EngineError> {
        let action =
            Action::from_code(self.action.action_type).ok_or(EngineError::TypeMismatch)?;
        let callout_key = Uuid::from(self.action.callout_key);
        let conditions = self
            .conditions()
            .iter()
            .map(FilterCondition::to_match)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Rule {
            id: Uuid::from(self.filter_key).into(),
            kernel_id: 0,
            name: self.display_data.name(),
            description: self.display_data.description(),
            layer: Uuid::from(self.layer_key).into(),
            sublayer: Uuid::from(self.sublayer_key).into(),
            weight: self.weight.as_u64().unwrap_or_default(),
            conditions,
            action,
            callout: (!callout_key.is_nil()).then_some(CalloutId(callout_key)),
            permit_if_callout_missing: self.flags & FILTER_FLAG_PERMIT_IF_CALLOUT_UNREGISTERED
                != 0,
            hard_action: self.flags & FILTER_FLAG_CLEAR_ACTION_RIGHT != 0,
            persistent: self.flags & FILTER_FLAG_PERSISTENT != 0,
            boot_time: self.flags & FILTER_FLAG_BOOTTIME != 0,
            provider: self.provider_key.map(|g| ProviderId(Uuid::from(*g))),
            provider_data: self.provider_data.as_slice().to_vec(),
            disabled: self.flags & FILTER_FLAG_DISABLED != 0,
        })
    }
}

/// Provider descriptor passed to add-provider.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProviderDescriptor<'a> {
    provider_key: Guid,
    display_data: DisplayData<'a>,
    flags: u32,
    provider_data: ByteBlob<'a>,
    service_name: WideStr<'a>,
}

impl<'a> ProviderDescriptor<'a> {
    pub fn new_in(arena: &'a Arena, provider: &Provider) -> Result<&'a Self> {
        let mut flags = 0;
        if provider.persistent {
            flags |= PROVIDER_FLAG_PERSISTENT;
        }
        if provider.disabled {
            flags |= PROVIDER_FLAG_DISABLED;
        }
        Ok(arena.alloc(Self {
            provider_key: guid(provider.id),
            display_data: DisplayData::new_in(arena, &provider.name, &provider.description)?,
            flags,
            provider_data: ByteBlob::new_in(arena, "data", &provider.data)?,
            service_name: WideStr::new_in(arena, "service_name", &provider.service_name)?,
        }))
    }

    pub fn to_provider(&self) -> Provider {
        Provider {
            id: Uuid::from(self.provider_key).into(),
            name: self.display_data.name(),
            description: self.display_data.description(),
            service_name: self.service_name.to_owned_or_empty(),
            persistent: self.flags & PROVIDER_FLAG_PERSISTENT != 0,
            disabled: self.flags & PROVIDER_FLAG_DISABLED != 0,
            data: self.provider_data.as_slice().to_vec(),
        }
    }
}

/// Sublayer descriptor passed to add-sublayer.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SublayerDescriptor<'a> {
    sublayer_key: Guid,
    display_data: DisplayData<'a>,
    flags: u32,
    provider_key: Option<&'a Guid>,
    provider_data: ByteBlob<'a>,
    weight: u16,
}

impl<'a> SublayerDescriptor<'a> {
    pub fn new_in(arena: &'a Arena, sublayer: &Sublayer) -> Result<&'a Self> {
        Ok(arena.alloc(Self {
            sublayer_key: guid(sublayer.id),
            display_data: DisplayData::new_in(arena, &sublayer.name, &sublayer.description)?,
            flags: if sublayer.persistent {
                SUBLAYER_FLAG_PERSISTENT
            } else {
                0
            },
            provider_key: optional_guid(arena, sublayer.provider),
            provider_data: ByteBlob::new_in(arena, "provider_data", &sublayer.provider_data)?,
            weight: sublayer.weight,
        }))
    }

    pub fn to_sublayer(&self) -> Sublayer {
        Sublayer {
            id: Uuid::from(self.sublayer_key).into(),
            name: self.display_data.name(),
            description: self.display_data.description(),
            persistent: self.flags & SUBLAYER_FLAG_PERSISTENT != 0,
            provider: self.provider_key.map(|g| ProviderId(Uuid::from(*g))),
            provider_data: self.provider_data.as_slice().to_vec(),
            weight: self.weight,
        }
    }
}

/// Restricts sublayer enumeration to one provider.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SublayerEnumTemplate<'a> {
    provider_key: Option<&'a Guid>,
}

impl<'a> SublayerEnumTemplate<'a> {
    pub fn new_in(arena: &'a Arena, provider: Option<ProviderId>) -> &'a Self {
        arena.alloc(Self {
            provider_key: optional_guid(arena, provider),
        })
    }

    pub fn provider(&self) -> Option<ProviderId> {
        self.provider_key.map(|g| ProviderId(Uuid::from(*g)))
    }
}

/// Parameters for opening a session handle.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SessionDescriptor<'a> {
    session_key: Guid,
    display_data: DisplayData<'a>,
    flags: u32,
    txn_wait_timeout_ms: u32,
}

impl<'a> SessionDescriptor<'a> {
    pub fn new_in(
        arena: &'a Arena,
        name: &str,
        description: &str,
        dynamic: bool,
        txn_wait_timeout: Duration,
    ) -> Result<&'a Self> {
        Ok(arena.alloc(Self {
            session_key: guid(Uuid::new_v4()),
            display_data: DisplayData::new_in(arena, name, description)?,
            flags: if dynamic { SESSION_FLAG_DYNAMIC } else { 0 },
            txn_wait_timeout_ms: u32::try_from(txn_wait_timeout.as_millis()).unwrap_or(u32::MAX),
        }))
    }

    pub fn key(&self) -> Uuid {
        self.session_key.into()
    }

    pub fn name(&self) -> String {
        self.display_data.name()
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags & SESSION_FLAG_DYNAMIC != 0
    }

    pub fn txn_wait_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.txn_wait_timeout_ms))
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProviderContextEnumTemplate<'a> {
    provider_key: Option<&'a Guid>,
    provider_context_type: u32,
}

/// Rule enumeration template.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FilterEnumTemplate<'a> {
    provider_key: Option<&'a Guid>,
    layer_key: Guid,
    enum_type: u32,
    flags: u32,
    provider_context_template: Option<&'a ProviderContextEnumTemplate<'a>>,
    action_mask: u32,
    callout_key: Option<&'a Guid>,
}

impl<'a> FilterEnumTemplate<'a> {
    pub fn new_in(arena: &'a Arena, query: &RuleQuery) -> &'a Self {
        let provider_context_template = query.provider_context.map(|(provider, context_type)| {
            &*arena.alloc(ProviderContextEnumTemplate {
                provider_key: Some(&*arena.alloc(guid(provider))),
                provider_context_type: context_type,
            })
        });
        arena.alloc(Self {
            provider_key: optional_guid(arena, query.provider),
            layer_key: guid(query.layer),
            enum_type: query.enum_type.code(),
            flags: query.flags.0,
            provider_context_template,
            action_mask: query.action_mask.0,
            callout_key: optional_guid(arena, query.callout),
        })
    }

    pub fn to_query(&self) -> std::result::Result<RuleQuery, EngineError> {
        let enum_type =
            FilterEnumType::from_code(self.enum_type).ok_or(EngineError::InvalidEnumerator)?;
        let provider_context = match self.provider_context_template {
            None => None,
            Some(template) => {
                let provider = template.provider_key.ok_or(EngineError::NilPointer)?;
                Some((
                    ProviderId(Uuid::from(*provider)),
                    template.provider_context_type,
                ))
            }
        };
        Ok(RuleQuery {
            provider: self.provider_key.map(|g| ProviderId(Uuid::from(*g))),
            layer: Uuid::from(self.layer_key).into(),
            enum_type,
            flags: FilterEnumFlags(self.flags),
            action_mask: ActionFlag(self.action_mask),
            provider_context,
            callout: self.callout_key.map(|g| CalloutId(Uuid::from(*g))),
        })
    }
}
