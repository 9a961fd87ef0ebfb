//! Human-readable byte sizes (spec §4.1, C1).
//!
//! Grounded in `original_source/libs/core/core/memory/ByteSize.cpp`: the unit
//! table is reproduced verbatim (SI `KB..PB` vs. IEC `KiB..PiB`, with bare
//! `k/m/g/t/p` meaning IEC), and the integer-vs-fractional parse branch keeps
//! the same semantics — take the integer literal if the grammar matches it,
//! otherwise `floor(real * unit)`.

use crate::error::BadCast;

/// A named unit, carrying its multiplier in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Bytes,
    KB,
    MB,
    GB,
    TB,
    PB,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
}

impl Unit {
    /// Multiplier in bytes.
    #[must_use]
    pub const fn multiplier(self) -> u64 {
        const KB: u64 = 1_000;
        const MB: u64 = KB * 1_000;
        const GB: u64 = MB * 1_000;
        const TB: u64 = GB * 1_000;
        const PB: u64 = TB * 1_000;
        const KIB: u64 = 1_024;
        const MIB: u64 = KIB * 1_024;
        const GIB: u64 = MIB * 1_024;
        const TIB: u64 = GIB * 1_024;
        const PIB: u64 = TIB * 1_024;
        match self {
            Self::Bytes => 1,
            Self::KB => KB,
            Self::MB => MB,
            Self::GB => GB,
            Self::TB => TB,
            Self::PB => PB,
            Self::KiB => KIB,
            Self::MiB => MIB,
            Self::GiB => GIB,
            Self::TiB => TIB,
            Self::PiB => PIB,
        }
    }

    /// Canonical unit name, as printed by [`ByteSize::format`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bytes => "B",
            Self::KB => "KB",
            Self::MB => "MB",
            Self::GB => "GB",
            Self::TB => "TB",
            Self::PB => "PB",
            Self::KiB => "KiB",
            Self::MiB => "MiB",
            Self::GiB => "GiB",
            Self::TiB => "TiB",
            Self::PiB => "PiB",
        }
    }

    /// Parse a unit token, case-insensitively. Bare `k/m/g/t/p` mean IEC.
    fn parse(token: &str) -> Option<Self> {
        Some(match token.to_ascii_lowercase().as_str() {
            "" | "b" | "byte" | "bytes" => Self::Bytes,
            "kb" => Self::KB,
            "mb" => Self::MB,
            "gb" => Self::GB,
            "tb" => Self::TB,
            "pb" => Self::PB,
            "k" | "kib" => Self::KiB,
            "m" | "mib" => Self::MiB,
            "g" | "gib" => Self::GiB,
            "t" | "tib" => Self::TiB,
            "p" | "pib" => Self::PiB,
            _ => return None,
        })
    }

    /// All IEC units, smallest first, used by [`ByteSize::human`].
    const IEC_FAMILY: [Self; 6] = [
        Self::Bytes,
        Self::KiB,
        Self::MiB,
        Self::GiB,
        Self::TiB,
        Self::PiB,
    ];

    /// All SI units, smallest first, used by [`ByteSize::human`].
    const SI_FAMILY: [Self; 6] = [
        Self::Bytes,
        Self::KB,
        Self::MB,
        Self::GB,
        Self::TB,
        Self::PB,
    ];
}

/// Which unit family [`ByteSize::human`] should pick the largest fit from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Si,
    Iec,
}

/// A nonnegative byte count (spec §3: "Nonnegative 64-bit count of bytes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const ZERO: Self = Self(0);

    /// `of(n, unit)` — fails only via overflow, since `n` and `unit` are
    /// already nonnegative at the type level.
    #[must_use]
    pub fn of(n: u64, unit: Unit) -> Option<Self> {
        n.checked_mul(unit.multiplier()).map(Self)
    }

    /// Raw byte count.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Parse a literal matching `WS (int|real) WS unit? WS`, fully.
    ///
    /// The integer branch is tried first (an all-digit literal keeps full
    /// `u64` precision); anything else is parsed as `f64` and multiplied,
    /// rounding toward zero (`f64::trunc`), matching the original's
    /// `ulong_long` vs `double` grammar alternation.
    pub fn parse(s: &str) -> Result<Self, BadCast> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(BadCast::Malformed(s.to_string()));
        }

        let split_at = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
            .unwrap_or(trimmed.len());
        let (number, rest) = trimmed.split_at(split_at);
        let unit_token = rest.trim();

        if number.is_empty() {
            return Err(BadCast::Malformed(s.to_string()));
        }

        let Some(unit) = Unit::parse(unit_token) else {
            return Err(BadCast::Malformed(s.to_string()));
        };

        if let Ok(int_val) = number.parse::<u64>() {
            return int_val
                .checked_mul(unit.multiplier())
                .map(Self)
                .ok_or_else(|| BadCast::Overflow(s.to_string()));
        }

        let Ok(real_val) = number.parse::<f64>() else {
            return Err(BadCast::Malformed(s.to_string()));
        };
        if real_val < 0.0 {
            return Err(BadCast::Negative(s.to_string()));
        }
        let scaled = (real_val * unit.multiplier() as f64).trunc();
        if !scaled.is_finite() || scaled > u64::MAX as f64 {
            return Err(BadCast::Overflow(s.to_string()));
        }
        Ok(Self(scaled as u64))
    }

    /// Format as an integer for `Unit::Bytes`, else as a trimmed float, with
    /// the unit name appended.
    #[must_use]
    pub fn format(self, unit: Unit) -> String {
        if matches!(unit, Unit::Bytes) {
            return format!("{} {}", self.0, unit.name());
        }
        let value = self.0 as f64 / unit.multiplier() as f64;
        let mut text = format!("{value:.6}");
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
        format!("{text} {}", unit.name())
    }

    /// Largest unit in the given family where `size >= 1 * unit`.
    #[must_use]
    pub fn human(self, family: Family) -> String {
        let table: &[Unit] = match family {
            Family::Si => &Unit::SI_FAMILY,
            Family::Iec => &Unit::IEC_FAMILY,
        };
        let chosen = table
            .iter()
            .rev()
            .find(|u| self.0 >= u.multiplier())
            .copied()
            .unwrap_or(Unit::Bytes);
        self.format(chosen)
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.human(Family::Iec))
    }
}

impl std::str::FromStr for ByteSize {
    type Err = BadCast;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iec_fraction() {
        assert_eq!(ByteSize::parse("1.5 MiB").unwrap().bytes(), 1_572_864);
    }

    #[test]
    fn parses_si_integer() {
        assert_eq!(ByteSize::parse("1500 kb").unwrap().bytes(), 1_500_000);
    }

    #[test]
    fn rejects_negative() {
        assert!(matches!(ByteSize::parse("-1 B"), Err(BadCast::Negative(_))));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(matches!(ByteSize::parse("2 foo"), Err(BadCast::Malformed(_))));
    }

    #[test]
    fn bare_letters_mean_iec() {
        assert_eq!(ByteSize::parse("2k").unwrap().bytes(), 2 * 1024);
        assert_eq!(ByteSize::parse("2m").unwrap().bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(matches!(
            ByteSize::parse("99999999999999999999999 B"),
            Err(BadCast::Overflow(_))
        ));
    }

    #[test]
    fn format_drops_trailing_zeros() {
        assert_eq!(ByteSize::of(3, Unit::MiB).unwrap().format(Unit::MiB), "3 MiB");
        assert_eq!(ByteSize::of(1500, Unit::KB).unwrap().format(Unit::MB), "1.5 MB");
    }

    #[test]
    fn human_picks_largest_fitting_unit() {
        let size = ByteSize::of(1536, Unit::MiB).unwrap();
        assert_eq!(size.human(Family::Iec), "1.5 GiB");
    }

    #[test]
    fn round_trip_iec_multiples() {
        for &unit in &Unit::IEC_FAMILY {
            let size = ByteSize::of(7, unit).unwrap();
            let formatted = size.format(unit);
            assert_eq!(ByteSize::parse(&formatted).unwrap(), size);
        }
    }

    #[test]
    fn plain_integer_defaults_to_bytes() {
        assert_eq!(ByteSize::parse("512").unwrap().bytes(), 512);
    }
}
