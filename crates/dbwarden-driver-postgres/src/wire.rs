//! Binary wire formats with no built-in `FromSql`/`ToSql` mapping
//!
//! tokio-postgres always requests results in binary format, so every column
//! type needs an explicit decoder. Types listed here are rendered to the same
//! text Postgres itself prints for them.

use std::fmt;
use std::net::IpAddr;

use postgres_types::{FromSql, Kind, Type};

pub(crate) type BoxError = Box<dyn std::error::Error + Sync + Send>;

fn be_i64(raw: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    i64::from_be_bytes(bytes)
}

fn be_i32(raw: &[u8]) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[..4]);
    i32::from_be_bytes(bytes)
}

/// `HH:MM:SS[.ffffff]` with trailing fractional zeros trimmed
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let hours = abs / 3_600_000_000;
    let minutes = (abs / 60_000_000) % 60;
    let seconds = (abs / 1_000_000) % 60;
    let fraction = abs % 1_000_000;

    let mut out = format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds);
    if fraction > 0 {
        let digits = format!("{:06}", fraction);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// NUMERIC as exact decimal text
#[derive(Debug)]
pub(crate) struct Numeric(pub(crate) String);

impl Numeric {
    pub(crate) const NAN: u16 = 0xC000;
    pub(crate) const NEGATIVE: u16 = 0x4000;
    const DSCALE_MAX: usize = 0x3FFF;

    /// Decode the binary layout: ndigits, weight, sign, dscale, then base-10000
    /// digit groups
    pub(crate) fn decode(raw: &[u8]) -> Result<String, BoxError> {
        let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
        if raw.len() < 8 {
            return Err("invalid NUMERIC payload: too short".into());
        }

        let ndigits = word(0) as usize;
        let weight = word(2) as i16;
        let sign = word(4);
        let dscale = word(6) as usize;
        if raw.len() < 8 + ndigits * 2 {
            return Err("invalid NUMERIC payload: truncated digits".into());
        }
        if sign == Self::NAN {
            return Ok("NaN".to_string());
        }

        let groups: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
        if groups.iter().any(|g| *g > 9999) {
            return Err("invalid NUMERIC payload: digit group out of range".into());
        }

        let int_groups = if weight >= 0 { weight as usize + 1 } else { 0 };
        let mut integer = String::new();
        for i in 0..int_groups {
            let group = groups.get(i).copied().unwrap_or(0);
            if i == 0 {
                integer.push_str(&group.to_string());
            } else {
                integer.push_str(&format!("{:04}", group));
            }
        }
        if integer.is_empty() {
            integer.push('0');
        }

        let mut fraction = String::new();
        if dscale > 0 {
            // Negative weight means leading zero groups before the first stored digit
            let leading_zero_groups = if weight < -1 { (-weight - 1) as usize } else { 0 };
            fraction.push_str(&"0000".repeat(leading_zero_groups));
            for group in groups.iter().skip(int_groups) {
                fraction.push_str(&format!("{:04}", group));
            }
            if fraction.len() < dscale {
                fraction.push_str(&"0".repeat(dscale - fraction.len()));
            }
            fraction.truncate(dscale);
        }

        let mut out = String::new();
        if sign == Self::NEGATIVE && groups.iter().any(|g| *g != 0) {
            out.push('-');
        }
        out.push_str(&integer);
        if !fraction.is_empty() {
            out.push('.');
            out.push_str(&fraction);
        }
        Ok(out)
    }

    /// Encode plain decimal text (`-12.50`, `.5`, `NaN`) into the binary layout.
    /// Exponent notation is rejected.
    pub(crate) fn encode(text: &str) -> Result<Vec<u8>, String> {
        let text = text.trim();
        let mut out = Vec::with_capacity(16);
        let mut header = |ndigits: u16, weight: i16, sign: u16, dscale: u16| {
            out.extend_from_slice(&ndigits.to_be_bytes());
            out.extend_from_slice(&weight.to_be_bytes());
            out.extend_from_slice(&sign.to_be_bytes());
            out.extend_from_slice(&dscale.to_be_bytes());
        };

        if text.eq_ignore_ascii_case("nan") {
            header(0, 0, Self::NAN, 0);
            return Ok(out);
        }

        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty()) || !all_digits(int_part) || !all_digits(frac_part) {
            return Err(format!("'{}' is not a decimal number", text));
        }
        if frac_part.len() > Self::DSCALE_MAX {
            return Err(format!("'{}' has too many fractional digits", text));
        }

        let int_pad = (4 - int_part.len() % 4) % 4;
        let frac_pad = (4 - frac_part.len() % 4) % 4;
        let digits = format!(
            "{}{}{}{}",
            "0".repeat(int_pad),
            int_part,
            frac_part,
            "0".repeat(frac_pad)
        );
        let mut groups: Vec<u16> = digits
            .as_bytes()
            .chunks(4)
            .map(|chunk| chunk.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
            .collect();

        let mut weight = ((int_part.len() + int_pad) / 4) as i64 - 1;
        while groups.first() == Some(&0) {
            groups.remove(0);
            weight -= 1;
        }
        while groups.last() == Some(&0) {
            groups.pop();
        }
        if groups.is_empty() {
            weight = 0;
        }

        let ndigits = u16::try_from(groups.len()).map_err(|_| format!("'{}' has too many digits", text))?;
        let weight = i16::try_from(weight).map_err(|_| format!("'{}' is out of NUMERIC range", text))?;
        let sign = if negative && !groups.is_empty() { Self::NEGATIVE } else { 0 };
        header(ndigits, weight, sign, frac_part.len() as u16);
        for group in groups {
            out.extend_from_slice(&group.to_be_bytes());
        }
        Ok(out)
    }
}

impl<'a> FromSql<'a> for Numeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(Self::decode(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// INTERVAL: microseconds, days and months kept as separate fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interval {
    pub(crate) months: i32,
    pub(crate) days: i32,
    pub(crate) micros: i64,
}

impl<'a> FromSql<'a> for Interval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 16 {
            return Err(format!("invalid INTERVAL payload: {} bytes", raw.len()).into());
        }
        Ok(Self {
            micros: be_i64(&raw[0..8]),
            days: be_i32(&raw[8..12]),
            months: be_i32(&raw[12..16]),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// Postgres output style: `1 year 2 mons 3 days 04:05:06.789`
impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        let mut seen_negative = false;
        let mut field = |value: i64, unit: &str| {
            if value == 0 {
                return;
            }
            let plus = if seen_negative && value > 0 { "+" } else { "" };
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{}{} {}{}", plus, value, unit, plural));
            seen_negative |= value < 0;
        };
        field(i64::from(self.months / 12), "year");
        field(i64::from(self.months % 12), "mon");
        field(i64::from(self.days), "day");

        if self.micros != 0 || parts.is_empty() {
            let plus = if seen_negative && self.micros > 0 { "+" } else { "" };
            parts.push(format!("{}{}", plus, clock(self.micros)));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// INET and CIDR in Postgres text form (`10.0.0.1`, `10.0.0.0/8`)
#[derive(Debug)]
pub(crate) struct Inet(pub(crate) String);

impl Inet {
    const FAMILY_V4: u8 = 2;
    const FAMILY_V6: u8 = 3;
}

impl<'a> FromSql<'a> for Inet {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() < 4 {
            return Err("invalid INET payload: too short".into());
        }
        let (family, bits, is_cidr, len) = (raw[0], raw[1], raw[2] != 0, raw[3] as usize);
        let addr = &raw[4..];
        if addr.len() != len {
            return Err("invalid INET payload: address length mismatch".into());
        }

        let (ip, max_bits) = match (family, addr.len()) {
            (Self::FAMILY_V4, 4) => (IpAddr::from(<[u8; 4]>::try_from(addr)?), 32),
            (Self::FAMILY_V6, 16) => (IpAddr::from(<[u8; 16]>::try_from(addr)?), 128),
            _ => return Err(format!("invalid INET payload: family {}", family).into()),
        };

        let text = if is_cidr || bits != max_bits {
            format!("{}/{}", ip, bits)
        } else {
            ip.to_string()
        };
        Ok(Self(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INET || *ty == Type::CIDR
    }
}

/// TIMETZ: time of day plus the zone offset (stored as seconds west of UTC)
#[derive(Debug)]
pub(crate) struct TimeTz(pub(crate) String);

impl<'a> FromSql<'a> for TimeTz {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 12 {
            return Err(format!("invalid TIMETZ payload: {} bytes", raw.len()).into());
        }
        let micros = be_i64(&raw[0..8]);
        let offset = -be_i32(&raw[8..12]);

        let sign = if offset < 0 { '-' } else { '+' };
        let abs = offset.unsigned_abs();
        let mut zone = format!("{}{:02}", sign, abs / 3600);
        if abs % 3600 != 0 {
            zone.push_str(&format!(":{:02}", (abs / 60) % 60));
        }
        if abs % 60 != 0 {
            zone.push_str(&format!(":{:02}", abs % 60));
        }
        Ok(Self(format!("{}{}", clock(micros), zone)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::TIMETZ
    }
}

/// MONEY, an integer count of cents, as exact decimal text
#[derive(Debug)]
pub(crate) struct Money(pub(crate) String);

impl<'a> FromSql<'a> for Money {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if raw.len() != 8 {
            return Err(format!("invalid MONEY payload: {} bytes", raw.len()).into());
        }
        let cents = be_i64(raw);
        let sign = if cents < 0 { "-" } else { "" };
        let abs = cents.unsigned_abs();
        Ok(Self(format!("{}{}.{:02}", sign, abs / 100, abs % 100)))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::MONEY
    }
}

/// Whether the type's binary send format is its plain UTF-8 text
pub(crate) fn is_text_wire(ty: &Type) -> bool {
    match ty.kind() {
        Kind::Enum(_) => true,
        Kind::Domain(inner) => is_text_wire(inner),
        _ => {
            matches!(
                *ty,
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML
            ) || ty.name() == "citext"
        }
    }
}

/// UTF-8 payload of enums, text domains and citext
#[derive(Debug)]
pub(crate) struct RawText(pub(crate) String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(ty: &Type) -> bool {
        is_text_wire(ty)
    }
}

/// Undecoded binary payload of any other type
#[derive(Debug)]
pub(crate) struct RawBytes(pub(crate) Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(raw.to_vec()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}
