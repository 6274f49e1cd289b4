//! Geometry values and their canonical binary form.
//!
//! Geometries are stored as a small header followed by a WKB body:
//!
//! ```text
//! "GP" | version=0 | flags | srs_id:i32le=0 | envelope:f64le* | WKB (ISO, little-endian)
//! ```
//!
//! `flags` bit 0 marks little-endian header fields, bits 1-3 select the
//! envelope layout (0 none, 1 XY, 2 XYZ) and bit 4 marks empty geometries.
//! Points and empty geometries carry no envelope; everything else carries an
//! XY envelope, or XYZ when the geometry has a Z dimension. The spatial
//! reference is a property of the column, so `srs_id` is always zero.
//!
//! Input may be any-endian ISO or EWKB, or already framed bytes; either way it
//! is rewritten into exactly one byte sequence per geometry so that equal
//! shapes hash equally.

use std::fmt;
use std::str::FromStr;

const MAGIC: &[u8; 2] = b"GP";
const VERSION: u8 = 0;
const HEADER_LEN: usize = 8;

const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_MASK: u8 = 0b0000_1110;
const FLAG_EMPTY: u8 = 0b0001_0000;
const FLAG_EXTENDED: u8 = 0b0010_0000;

const ENVELOPE_XY: u8 = 1;
const ENVELOPE_XYZ: u8 = 2;

const EWKB_Z: u32 = 0x8000_0000;
const EWKB_M: u32 = 0x4000_0000;
const EWKB_SRID: u32 = 0x2000_0000;

const MAX_NESTING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    const ALL: [GeometryType; 7] = [
        GeometryType::Point,
        GeometryType::LineString,
        GeometryType::Polygon,
        GeometryType::MultiPoint,
        GeometryType::MultiLineString,
        GeometryType::MultiPolygon,
        GeometryType::GeometryCollection,
    ];

    pub fn wkb_code(self) -> u32 {
        match self {
            GeometryType::Point => 1,
            GeometryType::LineString => 2,
            GeometryType::Polygon => 3,
            GeometryType::MultiPoint => 4,
            GeometryType::MultiLineString => 5,
            GeometryType::MultiPolygon => 6,
            GeometryType::GeometryCollection => 7,
        }
    }

    pub fn from_wkb_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.wkb_code() == code)
    }

    /// The WKT name, e.g. `MULTIPOLYGON`.
    pub fn name(self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    fn member(self) -> Option<GeometryType> {
        match self {
            GeometryType::MultiPoint => Some(GeometryType::Point),
            GeometryType::MultiLineString => Some(GeometryType::LineString),
            GeometryType::MultiPolygon => Some(GeometryType::Polygon),
            _ => None,
        }
    }
}

/// Coordinate dimensions beyond X and Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub z: bool,
    pub m: bool,
}

impl Dimensions {
    fn coordinates(self) -> usize {
        2 + self.z as usize + self.m as usize
    }

    fn iso_offset(self) -> u32 {
        match (self.z, self.m) {
            (false, false) => 0,
            (true, false) => 1000,
            (false, true) => 2000,
            (true, true) => 3000,
        }
    }

    fn suffix(self) -> &'static str {
        match (self.z, self.m) {
            (false, false) => "",
            (true, false) => " Z",
            (false, true) => " M",
            (true, true) => " ZM",
        }
    }
}

/// A column's declared geometry type, e.g. `MULTIPOLYGON Z` or `GEOMETRY`.
///
/// `base: None` is the generic `GEOMETRY` type and accepts any shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeometryKind {
    pub base: Option<GeometryType>,
    pub dimensions: Dimensions,
}

impl GeometryKind {
    /// Whether a value of this geometry can be stored in a column of this kind.
    ///
    /// A generic `GEOMETRY` column without explicit dimensions takes anything;
    /// concrete types must match both the base type and the dimensions.
    pub fn accepts(&self, geometry: &Geometry) -> bool {
        match self.base {
            None => self.dimensions == Dimensions::default() || self.dimensions == geometry.dimensions,
            Some(base) => base == geometry.geometry_type && self.dimensions == geometry.dimensions,
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.base.map(GeometryType::name).unwrap_or("GEOMETRY");
        write!(f, "{base}{}", self.dimensions.suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseGeometryKindError(pub String);

impl fmt::Display for ParseGeometryKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown geometry type {:?}", self.0)
    }
}

impl std::error::Error for ParseGeometryKindError {}

impl FromStr for GeometryKind {
    type Err = ParseGeometryKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let (name, suffix) = match upper.split_once(' ') {
            Some((name, suffix)) => (name.to_owned(), suffix.trim().to_owned()),
            None => {
                // Also accept the compact `POINTZ` / `POINTZM` spelling.
                let name = upper.trim_end_matches(['Z', 'M']);
                (name.to_owned(), upper[name.len()..].to_owned())
            }
        };
        let dimensions = match suffix.as_str() {
            "" => Dimensions::default(),
            "Z" => Dimensions { z: true, m: false },
            "M" => Dimensions { z: false, m: true },
            "ZM" => Dimensions { z: true, m: true },
            _ => return Err(ParseGeometryKindError(s.to_owned())),
        };
        let base = if name == "GEOMETRY" {
            None
        } else {
            Some(
                GeometryType::ALL
                    .into_iter()
                    .find(|t| t.name() == name)
                    .ok_or_else(|| ParseGeometryKindError(s.to_owned()))?,
            )
        };
        Ok(GeometryKind { base, dimensions })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    /// `(min_z, max_z)` for XYZ envelopes.
    pub z: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    Truncated,
    TrailingBytes,
    BadByteOrder(u8),
    UnknownType(u32),
    BadMember {
        parent: GeometryType,
        member: GeometryType,
    },
    MixedDimensions,
    TooDeep,
    BadHeader(&'static str),
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "geometry is truncated"),
            Self::TrailingBytes => write!(f, "unexpected bytes after geometry"),
            Self::BadByteOrder(b) => write!(f, "invalid WKB byte order marker {b}"),
            Self::UnknownType(code) => write!(f, "unsupported WKB geometry type {code}"),
            Self::BadMember { parent, member } => {
                write!(f, "{} cannot contain {}", parent.name(), member.name())
            }
            Self::MixedDimensions => write!(f, "geometry mixes coordinate dimensions"),
            Self::TooDeep => write!(f, "geometry collections nested too deeply"),
            Self::BadHeader(reason) => write!(f, "invalid geometry header: {reason}"),
        }
    }
}

impl std::error::Error for GeometryError {}

/// A geometry in canonical binary form.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Geometry {
    bytes: Vec<u8>,
    geometry_type: GeometryType,
    dimensions: Dimensions,
    body_offset: usize,
}

impl Geometry {
    /// Normalizes a WKB (ISO or EWKB, either byte order) geometry.
    pub fn from_wkb(wkb: &[u8]) -> Result<Self, GeometryError> {
        let mut body = Vec::with_capacity(wkb.len());
        let mut bounds = Bounds::default();
        let mut reader = Reader { buf: wkb };
        let (geometry_type, dimensions) =
            copy_geometry(&mut reader, &mut body, &mut bounds, None, 0)?;
        if !reader.buf.is_empty() {
            return Err(GeometryError::TrailingBytes);
        }

        let mut flags = FLAG_LITTLE_ENDIAN;
        let envelope = if !bounds.seen {
            flags |= FLAG_EMPTY;
            None
        } else if geometry_type == GeometryType::Point {
            None
        } else if dimensions.z {
            flags |= ENVELOPE_XYZ << 1;
            Some(bounds.envelope(true))
        } else {
            flags |= ENVELOPE_XY << 1;
            Some(bounds.envelope(false))
        };

        let mut bytes = Vec::with_capacity(HEADER_LEN + 48 + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.push(flags);
        bytes.extend_from_slice(&0i32.to_le_bytes());
        if let Some(env) = envelope {
            for v in [env.min_x, env.max_x, env.min_y, env.max_y] {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            if let Some((min_z, max_z)) = env.z {
                bytes.extend_from_slice(&min_z.to_le_bytes());
                bytes.extend_from_slice(&max_z.to_le_bytes());
            }
        }
        let body_offset = bytes.len();
        bytes.extend_from_slice(&body);

        Ok(Geometry {
            bytes,
            geometry_type,
            dimensions,
            body_offset,
        })
    }

    /// Accepts either framed geometry bytes or bare WKB and returns the
    /// canonical form. Framed input is re-normalized, so a foreign `srs_id`,
    /// big-endian body or missing envelope is corrected here.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GeometryError> {
        if bytes.starts_with(MAGIC) {
            let (_, body_offset) = parse_header(bytes)?;
            Geometry::from_wkb(&bytes[body_offset..])
        } else {
            Geometry::from_wkb(bytes)
        }
    }

    /// Wraps bytes read back from the store without rewriting them.
    ///
    /// The header and body are checked for structural validity only.
    pub fn from_stored(bytes: Vec<u8>) -> Result<Self, GeometryError> {
        let (_, body_offset) = parse_header(&bytes)?;
        let mut scratch = Vec::new();
        let mut bounds = Bounds::default();
        let mut reader = Reader {
            buf: &bytes[body_offset..],
        };
        let (geometry_type, dimensions) =
            copy_geometry(&mut reader, &mut scratch, &mut bounds, None, 0)?;
        if !reader.buf.is_empty() {
            return Err(GeometryError::TrailingBytes);
        }
        Ok(Geometry {
            bytes,
            geometry_type,
            dimensions,
            body_offset,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The WKB body without the header.
    pub fn wkb(&self) -> &[u8] {
        &self.bytes[self.body_offset..]
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn kind(&self) -> GeometryKind {
        GeometryKind {
            base: Some(self.geometry_type),
            dimensions: self.dimensions,
        }
    }

    pub fn has_z(&self) -> bool {
        self.dimensions.z
    }

    pub fn has_m(&self) -> bool {
        self.dimensions.m
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[3] & FLAG_EMPTY != 0
    }

    pub fn envelope(&self) -> Option<Envelope> {
        let flags = self.bytes[3];
        let little = flags & FLAG_LITTLE_ENDIAN != 0;
        let indicator = (flags & FLAG_ENVELOPE_MASK) >> 1;
        if indicator == 0 {
            return None;
        }
        let read = |i: usize| {
            let start = HEADER_LEN + i * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&self.bytes[start..start + 8]);
            if little {
                f64::from_le_bytes(raw)
            } else {
                f64::from_be_bytes(raw)
            }
        };
        Some(Envelope {
            min_x: read(0),
            max_x: read(1),
            min_y: read(2),
            max_y: read(3),
            z: (indicator == ENVELOPE_XYZ || indicator == 4).then(|| (read(4), read(5))),
        })
    }
}

impl fmt::Debug for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Geometry({}, {})",
            self.kind(),
            hex::encode(&self.bytes)
        )
    }
}

fn parse_header(bytes: &[u8]) -> Result<(u8, usize), GeometryError> {
    if bytes.len() < HEADER_LEN {
        return Err(GeometryError::Truncated);
    }
    if &bytes[0..2] != MAGIC {
        return Err(GeometryError::BadHeader("missing magic"));
    }
    if bytes[2] != VERSION {
        return Err(GeometryError::BadHeader("unsupported version"));
    }
    let flags = bytes[3];
    if flags & FLAG_EXTENDED != 0 {
        return Err(GeometryError::BadHeader("extended geometry types are not supported"));
    }
    let envelope_len = match (flags & FLAG_ENVELOPE_MASK) >> 1 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        _ => return Err(GeometryError::BadHeader("invalid envelope indicator")),
    };
    let body_offset = HEADER_LEN + envelope_len;
    if bytes.len() < body_offset {
        return Err(GeometryError::Truncated);
    }
    Ok((flags, body_offset))
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], GeometryError> {
        if self.buf.len() < N {
            return Err(GeometryError::Truncated);
        }
        let (head, tail) = self.buf.split_at(N);
        self.buf = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, GeometryError> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self, big_endian: bool) -> Result<u32, GeometryError> {
        let raw = self.take::<4>()?;
        Ok(if big_endian {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        })
    }

    fn f64(&mut self, big_endian: bool) -> Result<f64, GeometryError> {
        let raw = self.take::<8>()?;
        Ok(if big_endian {
            f64::from_be_bytes(raw)
        } else {
            f64::from_le_bytes(raw)
        })
    }
}

struct Bounds {
    min: [f64; 3],
    max: [f64; 3],
    seen: bool,
    seen_z: bool,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
            seen: false,
            seen_z: false,
        }
    }
}

impl Bounds {
    fn add(&mut self, coords: &[f64], dimensions: Dimensions) {
        let (x, y) = (coords[0], coords[1]);
        if x.is_nan() || y.is_nan() {
            return;
        }
        self.seen = true;
        for (axis, v) in [x, y].into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(v);
            self.max[axis] = self.max[axis].max(v);
        }
        if dimensions.z && !coords[2].is_nan() {
            self.seen_z = true;
            self.min[2] = self.min[2].min(coords[2]);
            self.max[2] = self.max[2].max(coords[2]);
        }
    }

    fn envelope(&self, with_z: bool) -> Envelope {
        Envelope {
            min_x: self.min[0],
            max_x: self.max[0],
            min_y: self.min[1],
            max_y: self.max[1],
            z: with_z.then(|| {
                if self.seen_z {
                    (self.min[2], self.max[2])
                } else {
                    (f64::NAN, f64::NAN)
                }
            }),
        }
    }
}

fn parse_type_code(code: u32) -> Result<(GeometryType, Dimensions, bool), GeometryError> {
    let has_srid = code & EWKB_SRID != 0;
    let mut dimensions = Dimensions {
        z: code & EWKB_Z != 0,
        m: code & EWKB_M != 0,
    };
    let iso = code & 0x0FFF_FFFF;
    match iso / 1000 {
        0 => {}
        1 => dimensions.z = true,
        2 => dimensions.m = true,
        3 => {
            dimensions.z = true;
            dimensions.m = true;
        }
        _ => return Err(GeometryError::UnknownType(code)),
    }
    let geometry_type =
        GeometryType::from_wkb_code(iso % 1000).ok_or(GeometryError::UnknownType(code))?;
    Ok((geometry_type, dimensions, has_srid))
}

fn copy_points(
    reader: &mut Reader,
    out: &mut Vec<u8>,
    bounds: &mut Bounds,
    dimensions: Dimensions,
    big_endian: bool,
    count: u32,
) -> Result<(), GeometryError> {
    let mut coords = [0f64; 4];
    for _ in 0..count {
        for c in coords.iter_mut().take(dimensions.coordinates()) {
            *c = reader.f64(big_endian)?;
            out.extend_from_slice(&c.to_le_bytes());
        }
        bounds.add(&coords, dimensions);
    }
    Ok(())
}

fn copy_geometry(
    reader: &mut Reader,
    out: &mut Vec<u8>,
    bounds: &mut Bounds,
    parent: Option<Dimensions>,
    depth: usize,
) -> Result<(GeometryType, Dimensions), GeometryError> {
    if depth > MAX_NESTING {
        return Err(GeometryError::TooDeep);
    }
    let big_endian = match reader.u8()? {
        0 => true,
        1 => false,
        b => return Err(GeometryError::BadByteOrder(b)),
    };
    let code = reader.u32(big_endian)?;
    let (geometry_type, dimensions, has_srid) = parse_type_code(code)?;
    if has_srid {
        reader.u32(big_endian)?;
    }
    if parent.is_some_and(|p| p != dimensions) {
        return Err(GeometryError::MixedDimensions);
    }

    out.push(1);
    out.extend_from_slice(&(geometry_type.wkb_code() + dimensions.iso_offset()).to_le_bytes());

    match geometry_type {
        GeometryType::Point => {
            copy_points(reader, out, bounds, dimensions, big_endian, 1)?;
        }
        GeometryType::LineString => {
            let count = reader.u32(big_endian)?;
            out.extend_from_slice(&count.to_le_bytes());
            copy_points(reader, out, bounds, dimensions, big_endian, count)?;
        }
        GeometryType::Polygon => {
            let rings = reader.u32(big_endian)?;
            out.extend_from_slice(&rings.to_le_bytes());
            for _ in 0..rings {
                let count = reader.u32(big_endian)?;
                out.extend_from_slice(&count.to_le_bytes());
                copy_points(reader, out, bounds, dimensions, big_endian, count)?;
            }
        }
        GeometryType::MultiPoint
        | GeometryType::MultiLineString
        | GeometryType::MultiPolygon
        | GeometryType::GeometryCollection => {
            let count = reader.u32(big_endian)?;
            out.extend_from_slice(&count.to_le_bytes());
            for _ in 0..count {
                let (member, _) =
                    copy_geometry(reader, out, bounds, Some(dimensions), depth + 1)?;
                if let Some(expected) = geometry_type.member() {
                    if member != expected {
                        return Err(GeometryError::BadMember {
                            parent: geometry_type,
                            member,
                        });
                    }
                }
            }
        }
    }
    Ok((geometry_type, dimensions))
}
