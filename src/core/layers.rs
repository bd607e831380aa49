//! Well-known engine identifiers and the built-in layer catalogue
//!
//! Identifier values match the platform's published GUIDs so rules built
//! against [`crate::core::memory::MemoryEngine`] carry the same keys a real
//! engine binding expects.

use crate::core::types::{DataType, Field, FieldId, Layer, LayerId, SublayerId};

pub const LAYER_ALE_AUTH_CONNECT_V4: LayerId =
    LayerId::from_u128(0xc38d57d1_05a7_4c33_904f_7fbceee60e82);
pub const LAYER_ALE_AUTH_CONNECT_V6: LayerId =
    LayerId::from_u128(0x4a72393b_319f_44bc_84c3_ba54dcb3b6b4);
pub const LAYER_ALE_AUTH_RECV_ACCEPT_V4: LayerId =
    LayerId::from_u128(0xe1cd9fe7_f4b5_4273_96c0_592e487b8650);
pub const LAYER_ALE_AUTH_RECV_ACCEPT_V6: LayerId =
    LayerId::from_u128(0xa3b42c97_9f04_4672_b87e_cee9c483257f);
pub const LAYER_STREAM_V4_DISCARD: LayerId =
    LayerId::from_u128(0x25c4c2c2_25ff_4352_82f9_c54a4a4726dc);

/// Sublayer every layer falls back to when a rule names none.
pub const SUBLAYER_UNIVERSAL: SublayerId =
    SublayerId::from_u128(0xeebecc03_ced4_4380_819a_2734397b2b6f);

pub const FIELD_ALE_APP_ID: FieldId = FieldId::from_u128(0xd78e1e87_8644_4ea5_9437_d809ecefc971);
pub const FIELD_ALE_USER_ID: FieldId = FieldId::from_u128(0xaf043a0a_b34d_4f86_979c_c90371af6e66);
pub const FIELD_IP_LOCAL_ADDRESS: FieldId =
    FieldId::from_u128(0xd9ee00de_c1ef_4617_bfe3_ffd8f5a08957);
pub const FIELD_IP_REMOTE_ADDRESS: FieldId =
    FieldId::from_u128(0xb235ae9a_1d64_49b8_a44c_5ff3d9095045);
pub const FIELD_IP_LOCAL_PORT: FieldId = FieldId::from_u128(0x0c1ba1af_5765_453f_af22_a8f791ac775b);
pub const FIELD_IP_REMOTE_PORT: FieldId =
    FieldId::from_u128(0xc35a604d_d22b_4e1a_91b4_68f674ee674b);
pub const FIELD_IP_PROTOCOL: FieldId = FieldId::from_u128(0x3971ef2b_623e_4f9a_8cb1_6e79b806b9a7);
pub const FIELD_INTERFACE_INDEX: FieldId =
    FieldId::from_u128(0x667fd755_d695_434a_8af5_d3835a1259bc);
pub const FIELD_FLAGS: FieldId = FieldId::from_u128(0x632ce23b_5167_435c_86d7_e903684aa80c);
pub const FIELD_DIRECTION: FieldId = FieldId::from_u128(0x8784c146_ca97_44d6_9fd1_19fb1840cbf7);

/// Human-readable names for the well-known fields, for display.
pub const FIELD_NAMES: [(FieldId, &str); 10] = [
    (FIELD_ALE_APP_ID, "ale-app-id"),
    (FIELD_ALE_USER_ID, "ale-user-id"),
    (FIELD_IP_LOCAL_ADDRESS, "ip-local-address"),
    (FIELD_IP_REMOTE_ADDRESS, "ip-remote-address"),
    (FIELD_IP_LOCAL_PORT, "ip-local-port"),
    (FIELD_IP_REMOTE_PORT, "ip-remote-port"),
    (FIELD_IP_PROTOCOL, "ip-protocol"),
    (FIELD_INTERFACE_INDEX, "interface-index"),
    (FIELD_FLAGS, "flags"),
    (FIELD_DIRECTION, "direction"),
];

pub fn field_name(id: FieldId) -> Option<&'static str> {
    FIELD_NAMES
        .iter()
        .find(|(field, _)| *field == id)
        .map(|(_, name)| *name)
}

fn ale_fields(address: DataType) -> Vec<Field> {
    vec![
        Field {
            id: FIELD_ALE_APP_ID,
            data_type: DataType::UnicodeString,
        },
        Field {
            id: FIELD_ALE_USER_ID,
            data_type: DataType::SecurityDescriptor,
        },
        Field {
            id: FIELD_FLAGS,
            data_type: DataType::Uint32,
        },
        Field {
            id: FIELD_INTERFACE_INDEX,
            data_type: DataType::Uint32,
        },
        Field {
            id: FIELD_IP_LOCAL_ADDRESS,
            data_type: address,
        },
        Field {
            id: FIELD_IP_LOCAL_PORT,
            data_type: DataType::Uint16,
        },
        Field {
            id: FIELD_IP_PROTOCOL,
            data_type: DataType::Uint8,
        },
        Field {
            id: FIELD_IP_REMOTE_ADDRESS,
            data_type: address,
        },
        Field {
            id: FIELD_IP_REMOTE_PORT,
            data_type: DataType::Uint16,
        },
    ]
}

fn layer(id: LayerId, kernel_id: u16, name: &str, fields: Vec<Field>) -> Layer {
    Layer {
        id,
        kernel_id,
        name: name.to_string(),
        description: name.to_string(),
        default_sublayer: SUBLAYER_UNIVERSAL,
        fields,
    }
}

/// Layers every engine exposes.
pub fn builtin_layers() -> Vec<Layer> {
    vec![
        layer(
            LAYER_ALE_AUTH_CONNECT_V4,
            48,
            "ALE Connect v4 Layer",
            ale_fields(DataType::Uint32),
        ),
        layer(
            LAYER_ALE_AUTH_CONNECT_V6,
            50,
            "ALE Connect v6 Layer",
            ale_fields(DataType::ByteArray16),
        ),
        layer(
            LAYER_ALE_AUTH_RECV_ACCEPT_V4,
            44,
            "ALE Receive/Accept v4 Layer",
            ale_fields(DataType::Uint32),
        ),
        layer(
            LAYER_ALE_AUTH_RECV_ACCEPT_V6,
            46,
            "ALE Receive/Accept v6 Layer",
            ale_fields(DataType::ByteArray16),
        ),
        layer(
            LAYER_STREAM_V4_DISCARD,
            21,
            "Stream v4 Discard Layer",
            vec![
                Field {
                    id: FIELD_DIRECTION,
                    data_type: DataType::Uint32,
                },
                Field {
                    id: FIELD_FLAGS,
                    data_type: DataType::Uint32,
                },
                Field {
                    id: FIELD_IP_LOCAL_ADDRESS,
                    data_type: DataType::Uint32,
                },
                Field {
                    id: FIELD_IP_LOCAL_PORT,
                    data_type: DataType::Uint16,
                },
                Field {
                    id: FIELD_IP_REMOTE_ADDRESS,
                    data_type: DataType::Uint32,
                },
                Field {
                    id: FIELD_IP_REMOTE_PORT,
                    data_type: DataType::Uint16,
                },
            ],
        ),
    ]
}

/// Whether a condition value of type `value` may be compared against a field
/// of type `field`.
///
/// Address fields also accept address/mask values of the same family, and
/// ranges are checked by their endpoints' types by the caller.
pub fn value_fits_field(field: DataType, value: DataType) -> bool {
    field == value
        || matches!(
            (field, value),
            (DataType::Uint32, DataType::V4AddrMask) | (DataType::ByteArray16, DataType::V6AddrMask)
        )
}
