//! Static property table.
//!
//! Maps canonical property names (`System.FileName`) to their wire identity, a
//! property set GUID plus either a numeric id or a string name, and back.
use std::fmt;

use bincode::{Decode, Encode};

use crate::rowset::vt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// Builds a GUID from its textual field groups, stored in the mixed-endian
    /// layout used on the wire.
    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        let d1 = data1.to_le_bytes();
        let d2 = data2.to_le_bytes();
        let d3 = data3.to_le_bytes();
        Self([
            d1[0], d1[1], d1[2], d1[3], d2[0], d2[1], d3[0], d3[1], data4[0], data4[1], data4[2],
            data4[3], data4[4], data4[5], data4[6], data4[7],
        ])
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub enum PropSpec {
    Id(u32),
    Name(String),
}

/// Full property identity: property set plus id or name within the set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct PropertyId {
    pub guid: Guid,
    pub spec: PropSpec,
}

impl PropertyId {
    pub const fn new(guid: Guid, id: u32) -> Self {
        Self {
            guid,
            spec: PropSpec::Id(id),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = name_for_id(self) {
            return f.write_str(name);
        }
        match &self.spec {
            PropSpec::Id(id) => write!(f, "{{{}}}/{id}", self.guid),
            PropSpec::Name(name) => write!(f, "{{{}}}/{name}", self.guid),
        }
    }
}

pub const PSGUID_STORAGE: Guid = Guid::from_fields(
    0xB725_F130,
    0x47EF,
    0x101A,
    [0xA5, 0xF1, 0x02, 0x60, 0x8C, 0x9E, 0xEB, 0xAC],
);
pub const PSGUID_QUERY: Guid = Guid::from_fields(
    0x4969_1C90,
    0x7E17,
    0x101A,
    [0xA9, 0x1C, 0x08, 0x00, 0x2B, 0x2E, 0xCD, 0xA9],
);
pub const PSGUID_ITEM_TYPE: Guid = Guid::from_fields(
    0x2863_6AA6,
    0x953D,
    0x11D2,
    [0xB5, 0xD6, 0x00, 0xC0, 0x4F, 0xD9, 0x18, 0xD0],
);
pub const PSGUID_KIND: Guid = Guid::from_fields(
    0x1E3E_E840,
    0xBC2B,
    0x476C,
    [0x82, 0x37, 0x2A, 0xCD, 0x1A, 0x83, 0x9B, 0x22],
);

pub const FILE_NAME: PropertyId = PropertyId::new(PSGUID_STORAGE, 10);
pub const SIZE: PropertyId = PropertyId::new(PSGUID_STORAGE, 12);
pub const DATE_MODIFIED: PropertyId = PropertyId::new(PSGUID_STORAGE, 14);
pub const RANK: PropertyId = PropertyId::new(PSGUID_QUERY, 3);
pub const WORK_ID: PropertyId = PropertyId::new(PSGUID_QUERY, 5);
pub const ITEM_URL: PropertyId = PropertyId::new(PSGUID_QUERY, 9);
pub const ITEM_TYPE: PropertyId = PropertyId::new(PSGUID_ITEM_TYPE, 11);
pub const KIND: PropertyId = PropertyId::new(PSGUID_KIND, 3);

#[derive(Debug)]
pub struct PropertyInfo {
    pub name: &'static str,
    pub id: PropertyId,
    /// Wire type values of this property are produced as.
    pub vtype: u16,
}

static PROPERTIES: [PropertyInfo; 8] = [
    PropertyInfo {
        name: "System.FileName",
        id: FILE_NAME,
        vtype: vt::VT_LPWSTR,
    },
    PropertyInfo {
        name: "System.Size",
        id: SIZE,
        vtype: vt::VT_UI8,
    },
    PropertyInfo {
        name: "System.DateModified",
        id: DATE_MODIFIED,
        vtype: vt::VT_FILETIME,
    },
    PropertyInfo {
        name: "System.Search.Rank",
        id: RANK,
        vtype: vt::VT_I4,
    },
    PropertyInfo {
        name: "System.Search.EntryID",
        id: WORK_ID,
        vtype: vt::VT_UI4,
    },
    PropertyInfo {
        name: "System.ItemUrl",
        id: ITEM_URL,
        vtype: vt::VT_LPWSTR,
    },
    PropertyInfo {
        name: "System.ItemType",
        id: ITEM_TYPE,
        vtype: vt::VT_LPWSTR,
    },
    PropertyInfo {
        name: "System.Kind",
        id: KIND,
        vtype: vt::VT_VECTOR | vt::VT_LPWSTR,
    },
];

pub fn properties() -> &'static [PropertyInfo] {
    &PROPERTIES
}

/// Looks up a property by canonical name, ignoring ASCII case.
pub fn id_for_name(name: &str) -> Option<PropertyId> {
    PROPERTIES
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .map(|p| p.id.clone())
}

pub fn name_for_id(id: &PropertyId) -> Option<&'static str> {
    PROPERTIES.iter().find(|p| p.id == *id).map(|p| p.name)
}
