use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RebuildError;
use crate::tags;
use crate::uids;

/// A data element tag, `(group, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub group: u16,
    pub element: u16,
}

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// File meta information lives in group 2 and nowhere else.
    pub fn is_meta(&self) -> bool {
        self.group == 0x0002
    }

    pub fn is_private(&self) -> bool {
        self.group % 2 == 1
    }

    pub fn is_group_length(&self) -> bool {
        self.element == 0x0000
    }

    /// The `GGGG,EEEE` form used by the viewer APIs and the tag dictionary.
    pub fn to_key(&self) -> String {
        format!("{:04X},{:04X}", self.group, self.element)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

impl FromStr for Tag {
    type Err = RebuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::util::parse_tag(s)
    }
}

/// Value representations. `UsOrSs` is the dictionary's "US or SS" pseudo-VR,
/// resolved against Pixel Representation when the element is written.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    AE,
    AS,
    AT,
    CS,
    DA,
    DS,
    DT,
    FD,
    FL,
    IS,
    LO,
    LT,
    OB,
    OD,
    OF,
    OL,
    OV,
    OW,
    PN,
    SH,
    SL,
    SQ,
    SS,
    ST,
    SV,
    TM,
    UC,
    UI,
    UL,
    UN,
    UR,
    US,
    UT,
    UV,
    UsOrSs,
}

/// How a VR's value is coerced from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrFamily {
    Tag,
    Text,
    Integer,
    Float,
    Binary,
}

impl Vr {
    pub fn from_code(code: &str) -> Option<Vr> {
        let vr = match code.trim() {
            "AE" => Vr::AE,
            "AS" => Vr::AS,
            "AT" => Vr::AT,
            "CS" => Vr::CS,
            "DA" => Vr::DA,
            "DS" => Vr::DS,
            "DT" => Vr::DT,
            "FD" => Vr::FD,
            "FL" => Vr::FL,
            "IS" => Vr::IS,
            "LO" => Vr::LO,
            "LT" => Vr::LT,
            "OB" => Vr::OB,
            "OD" => Vr::OD,
            "OF" => Vr::OF,
            "OL" => Vr::OL,
            "OV" => Vr::OV,
            "OW" => Vr::OW,
            "PN" => Vr::PN,
            "SH" => Vr::SH,
            "SL" => Vr::SL,
            "SQ" => Vr::SQ,
            "SS" => Vr::SS,
            "ST" => Vr::ST,
            "SV" => Vr::SV,
            "TM" => Vr::TM,
            "UC" => Vr::UC,
            "UI" => Vr::UI,
            "UL" => Vr::UL,
            "UN" => Vr::UN,
            "UR" => Vr::UR,
            "US" => Vr::US,
            "UT" => Vr::UT,
            "UV" => Vr::UV,
            "US or SS" => Vr::UsOrSs,
            _ => return None,
        };

        Some(vr)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Vr::AE => "AE",
            Vr::AS => "AS",
            Vr::AT => "AT",
            Vr::CS => "CS",
            Vr::DA => "DA",
            Vr::DS => "DS",
            Vr::DT => "DT",
            Vr::FD => "FD",
            Vr::FL => "FL",
            Vr::IS => "IS",
            Vr::LO => "LO",
            Vr::LT => "LT",
            Vr::OB => "OB",
            Vr::OD => "OD",
            Vr::OF => "OF",
            Vr::OL => "OL",
            Vr::OV => "OV",
            Vr::OW => "OW",
            Vr::PN => "PN",
            Vr::SH => "SH",
            Vr::SL => "SL",
            Vr::SQ => "SQ",
            Vr::SS => "SS",
            Vr::ST => "ST",
            Vr::SV => "SV",
            Vr::TM => "TM",
            Vr::UC => "UC",
            Vr::UI => "UI",
            Vr::UL => "UL",
            Vr::UN => "UN",
            Vr::UR => "UR",
            Vr::US => "US",
            Vr::UT => "UT",
            Vr::UV => "UV",
            Vr::UsOrSs => "US or SS",
        }
    }

    pub fn family(&self) -> VrFamily {
        match self {
            Vr::AT => VrFamily::Tag,
            Vr::AE
            | Vr::AS
            | Vr::CS
            | Vr::DA
            | Vr::DS
            | Vr::DT
            | Vr::IS
            | Vr::LO
            | Vr::LT
            | Vr::PN
            | Vr::SH
            | Vr::ST
            | Vr::TM
            | Vr::UC
            | Vr::UI
            | Vr::UR
            | Vr::UT => VrFamily::Text,
            Vr::SL | Vr::SS | Vr::SV | Vr::UL | Vr::US | Vr::UV | Vr::UsOrSs => {
                VrFamily::Integer
            }
            Vr::FD | Vr::FL => VrFamily::Float,
            Vr::OB | Vr::OD | Vr::OF | Vr::OL | Vr::OV | Vr::OW | Vr::SQ | Vr::UN => {
                VrFamily::Binary
            }
        }
    }

    /// Explicit VR elements of these types carry two reserved bytes and a
    /// 32-bit length instead of a 16-bit one.
    pub fn has_long_length(&self) -> bool {
        matches!(
            self,
            Vr::OB
                | Vr::OD
                | Vr::OF
                | Vr::OL
                | Vr::OV
                | Vr::OW
                | Vr::SQ
                | Vr::SV
                | Vr::UC
                | Vr::UN
                | Vr::UR
                | Vr::UT
                | Vr::UV
        )
    }

    /// Text whose bytes depend on Specific Character Set.
    pub fn is_charset_dependent(&self) -> bool {
        matches!(
            self,
            Vr::LO | Vr::LT | Vr::PN | Vr::SH | Vr::ST | Vr::UC | Vr::UT
        )
    }

    pub fn padding(&self) -> u8 {
        match self.family() {
            VrFamily::Text if *self != Vr::UI => b' ',
            _ => 0x00,
        }
    }

    /// Size in bytes of one binary number of this VR.
    pub fn number_width(&self) -> usize {
        match self {
            Vr::US | Vr::SS | Vr::UsOrSs => 2,
            Vr::UL | Vr::SL | Vr::FL | Vr::AT => 4,
            Vr::UV | Vr::SV | Vr::FD => 8,
            _ => 1,
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One value of a possibly multi-valued element.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Tag(Tag),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Tag(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Tag(t) => write!(f, "{}", t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DicomValue {
    Single(Scalar),
    Multi(Vec<Scalar>),
    Bytes(Vec<u8>),
    /// Sequence items, each a list of elements.
    Sequence(Vec<Vec<DataElement>>),
}

impl DicomValue {
    pub fn text(value: impl Into<String>) -> Self {
        DicomValue::Single(Scalar::Text(value.into()))
    }

    pub fn int(value: i64) -> Self {
        DicomValue::Single(Scalar::Int(value))
    }

    /// The scalar values, empty for binary and sequence values.
    pub fn scalars(&self) -> &[Scalar] {
        match self {
            DicomValue::Single(s) => std::slice::from_ref(s),
            DicomValue::Multi(v) => v,
            _ => &[],
        }
    }

    pub fn first_str(&self) -> Option<&str> {
        match self.scalars().first() {
            Some(Scalar::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn first_i64(&self) -> Option<i64> {
        self.scalars().first().and_then(Scalar::as_i64)
    }

    pub fn first_f64(&self) -> Option<f64> {
        self.scalars().first().and_then(Scalar::as_f64)
    }

    /// Backslash-joined text form, the way the element would read in a viewer.
    pub fn to_display_string(&self) -> String {
        match self {
            DicomValue::Bytes(b) => format!("<{} bytes>", b.len()),
            DicomValue::Sequence(items) => format!("<sequence of {} item(s)>", items.len()),
            _ => self
                .scalars()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("\\"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    pub tag: Tag,
    /// `None` when the tag is not in the dictionary; written as LO.
    pub vr: Option<Vr>,
    pub value: DicomValue,
}

impl DataElement {
    pub fn new(tag: Tag, vr: Option<Vr>, value: DicomValue) -> Self {
        Self { tag, vr, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    Native(Vec<u8>),
    Encapsulated {
        offset_table: Vec<u8>,
        fragments: Vec<Vec<u8>>,
    },
}

impl PixelData {
    /// Native bytes, or the first fragment of encapsulated data.
    pub fn first_frame_bytes(&self) -> &[u8] {
        match self {
            PixelData::Native(bytes) => bytes,
            PixelData::Encapsulated { fragments, .. } => {
                fragments.first().map(Vec::as_slice).unwrap_or(&[])
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PixelData::Native(bytes) => bytes.is_empty(),
            PixelData::Encapsulated { fragments, .. } => fragments.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodestreamContainer {
    /// Bare JPEG 2000 codestream starting with SOC/SIZ.
    Bare,
    /// JP2 file format (box structured, `ftyp` near the start).
    Boxed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Uncompressed,
    BaselineCompressed { precision: u8 },
    RawCodestream { container: CodestreamContainer },
    /// Opaque payload of unknown encoding, kept in a single fragment.
    Encapsulated,
}

impl PixelEncoding {
    pub fn transfer_syntax(&self) -> &'static str {
        match self {
            PixelEncoding::Uncompressed | PixelEncoding::Encapsulated => {
                uids::EXPLICIT_VR_LITTLE_ENDIAN
            }
            PixelEncoding::BaselineCompressed { precision } if *precision > 8 => {
                uids::JPEG_EXTENDED
            }
            PixelEncoding::BaselineCompressed { .. } => uids::JPEG_BASELINE,
            PixelEncoding::RawCodestream { .. } => uids::JPEG_2000_LOSSLESS,
        }
    }

    pub fn is_encapsulated(&self) -> bool {
        !matches!(self, PixelEncoding::Uncompressed)
    }
}

/// A reconstructed image object: file meta group, data set and pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub meta: BTreeMap<Tag, DataElement>,
    pub dataset: BTreeMap<Tag, DataElement>,
    pub pixel_data: PixelData,
    pub pixel_encoding: PixelEncoding,
}

impl Instance {
    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        if tag.is_meta() {
            self.meta.get(&tag)
        } else {
            self.dataset.get(&tag)
        }
    }

    pub fn str_attr(&self, tag: Tag) -> Option<&str> {
        self.get(tag).and_then(|e| e.value.first_str())
    }

    pub fn int_attr(&self, tag: Tag) -> Option<i64> {
        self.get(tag).and_then(|e| e.value.first_i64())
    }

    pub fn float_attr(&self, tag: Tag) -> Option<f64> {
        self.get(tag).and_then(|e| e.value.first_f64())
    }

    pub fn transfer_syntax(&self) -> Option<&str> {
        self.str_attr(tags::TRANSFER_SYNTAX_UID)
    }

    pub fn sop_class_uid(&self) -> Option<&str> {
        self.str_attr(tags::SOP_CLASS_UID)
    }

    pub fn sop_instance_uid(&self) -> Option<&str> {
        self.str_attr(tags::SOP_INSTANCE_UID)
    }
}
