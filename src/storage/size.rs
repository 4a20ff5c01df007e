use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::CurtinError;

const KIB: u64 = 1024;

/// A byte count normalized at parse time.
///
/// Config documents write sizes either as integers (bytes) or as strings
/// with a power-of-two multiplier suffix. `kB` and `K` both mean 1024;
/// there are no decimal (SI) units in this syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Size(pub u64);

impl Size {
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

/// Parses size strings like `512`, `10G`, `1.5M`, `100kB`.
///
/// Suffixes `B, K, M, G, T` select power-of-two multipliers; a trailing
/// `B` after a multiplier letter is accepted (`kB == k == 1024`).
/// Fractional values must multiply out to a whole number of bytes.
pub fn parse_size(s: &str) -> Result<u64, CurtinError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CurtinError::BadConfig(String::from("empty size string")));
    }

    let (digits, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(at) => s.split_at(at),
        None => (s, ""),
    };

    let multiplier = match suffix.trim() {
        "" | "B" => 1,
        "k" | "K" | "kB" | "KB" => KIB,
        "M" | "MB" => KIB.pow(2),
        "G" | "GB" => KIB.pow(3),
        "T" | "TB" => KIB.pow(4),
        unknown => {
            return Err(CurtinError::BadConfig(format!(
                "unknown size suffix {unknown:?} in {s:?}"
            )));
        }
    };

    if digits.contains('.') {
        let mantissa: f64 = digits.parse().map_err(|_| {
            CurtinError::BadConfig(format!("bad size value {s:?}"))
        })?;

        let product = mantissa * multiplier as f64;
        if product.fract() != 0.0 {
            return Err(CurtinError::BadConfig(format!(
                "size {s:?} is not a whole number of bytes"
            )));
        }

        return Ok(product as u64);
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| CurtinError::BadConfig(format!("bad size value {s:?}")))?;

    Ok(value * multiplier)
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizeVisitor;

        impl Visitor<'_> for SizeVisitor {
            type Value = Size;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte count or a size string like \"10G\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Size, E> {
                Ok(Size(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Size, E> {
                u64::try_from(v)
                    .map(Size)
                    .map_err(|_| E::custom(format!("negative size: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Size, E> {
                parse_size(v).map(Size).map_err(|err| E::custom(format!("{err:?}")))
            }
        }

        deserializer.deserialize_any(SizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        struct Test<'a> {
            s: &'a str,
            expected: u64,
        }

        let tests = vec![
            Test { s: "512", expected: 512 },
            Test { s: "512B", expected: 512 },
            Test { s: "1k", expected: 1024 },
            Test { s: "1K", expected: 1024 },
            Test { s: "1kB", expected: 1024 },
            Test { s: "1KB", expected: 1024 },
            Test { s: "8M", expected: 8 << 20 },
            Test { s: "3G", expected: 3 << 30 },
            Test { s: "2T", expected: 2 << 40 },
            Test { s: "1.5M", expected: 3 << 19 },
            Test { s: "0.5G", expected: 1 << 29 },
            Test { s: " 10G ", expected: 10 << 30 },
        ];

        for test in tests {
            let result = parse_size(test.s)
                .unwrap_or_else(|err| panic!("{}: unexpected error {err:?}", test.s));
            assert_eq!(test.expected, result, "bad result for {:?}", test.s);
        }
    }

    #[test]
    fn test_parse_size_invalid() {
        let invalids = vec!["", "G", "10Q", "1..5G", "10 gigs", "1.0000001k"];

        for s in invalids {
            parse_size(s).expect_err(&format!("{s:?} should not parse"));
        }
    }

    #[test]
    fn test_size_deserialize() {
        #[derive(Deserialize)]
        struct Doc {
            size: Size,
        }

        let from_int: Doc = serde_yaml::from_str("size: 1048576").unwrap();
        assert_eq!(from_int.size, Size(1 << 20));

        let from_str: Doc = serde_yaml::from_str("size: 1M").unwrap();
        assert_eq!(from_str.size, Size(1 << 20));
    }
}
