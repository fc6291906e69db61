//! Shared protocol enumerations: compositing modes, transfer functions,
//! stroke styles, and negotiated protocol versions.

/// Porter-Duff style channel mask describing how source pixels combine with
/// destination pixels. The 4-bit mask covers the pairs
/// `{src & !dst, src & dst, dst & !src, dst & src}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CompositeMode {
    RIn = 0x1,
    ROut = 0x2,
    In = 0x4,
    Atop = 0x6,
    Out = 0x8,
    RAtop = 0x9,
    Xor = 0xA,
    ROver = 0xB,
    Src = 0xC,
    Over = 0xE,
    Plus = 0xF,
}

impl CompositeMode {
    pub fn mask(self) -> i32 {
        self as i32
    }

    /// Maps a wire mask back to a mode. Unrecognized masks yield `None`;
    /// consumers typically fall back to [`CompositeMode::Over`].
    pub fn from_mask(mask: i32) -> Option<CompositeMode> {
        use CompositeMode::*;
        Some(match mask {
            0x1 => RIn,
            0x2 => ROut,
            0x4 => In,
            0x6 => Atop,
            0x8 => Out,
            0x9 => RAtop,
            0xA => Xor,
            0xB => ROver,
            0xC => Src,
            0xE => Over,
            0xF => Plus,
            _ => return None,
        })
    }
}

impl Default for CompositeMode {
    fn default() -> Self {
        CompositeMode::Over
    }
}

/// Binary transfer function applied bitwise to pixel channels by the
/// `transfer` instruction. The mask encodes the truth table over
/// (source, destination) bit pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransferFunction {
    Black = 0x0,
    And = 0x1,
    NSrcNor = 0x2,
    CopySrc = 0x3,
    NSrcAnd = 0x4,
    CopyDest = 0x5,
    Xor = 0x6,
    Or = 0x7,
    Nor = 0x8,
    Xnor = 0x9,
    NDest = 0xA,
    NSrcNand = 0xB,
    NSrc = 0xC,
    NSrcOr = 0xD,
    Nand = 0xE,
    White = 0xF,
}

impl TransferFunction {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> Option<TransferFunction> {
        use TransferFunction::*;
        Some(match value {
            0x0 => Black,
            0x1 => And,
            0x2 => NSrcNor,
            0x3 => CopySrc,
            0x4 => NSrcAnd,
            0x5 => CopyDest,
            0x6 => Xor,
            0x7 => Or,
            0x8 => Nor,
            0x9 => Xnor,
            0xA => NDest,
            0xB => NSrcNand,
            0xC => NSrc,
            0xD => NSrcOr,
            0xE => Nand,
            0xF => White,
            _ => return None,
        })
    }

    /// Applies the truth table to one pair of bits.
    pub fn apply(self, src: bool, dst: bool) -> bool {
        let bit = match (src, dst) {
            (false, false) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (true, true) => 3,
        };
        (self.value() >> bit) & 1 != 0
    }
}

/// Stroke endpoint style for `cstroke`/`lstroke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LineCapStyle {
    Butt = 0,
    Round = 1,
    Square = 2,
}

/// Stroke joint style for `cstroke`/`lstroke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LineJoinStyle {
    Bevel = 0,
    Miter = 1,
    Round = 2,
}

/// Protocol versions negotiable during the handshake. Ordered so that
/// `min`/`max` pick the older/newer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ProtocolVersion {
    V1_0_0 = 0x01_00_00,
    V1_1_0 = 0x01_01_00,
    V1_3_0 = 0x01_03_00,
}

impl ProtocolVersion {
    /// Parses a version token as it appears in the handshake. Both the
    /// `VERSION_1_3_0` argument-name form and the bare `1.3.0` value form
    /// are accepted.
    pub fn from_token(token: &str) -> Option<ProtocolVersion> {
        match token {
            "VERSION_1_0_0" | "1.0.0" => Some(ProtocolVersion::V1_0_0),
            "VERSION_1_1_0" | "1.1.0" => Some(ProtocolVersion::V1_1_0),
            "VERSION_1_3_0" | "1.3.0" => Some(ProtocolVersion::V1_3_0),
            _ => None,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            ProtocolVersion::V1_0_0 => "VERSION_1_0_0",
            ProtocolVersion::V1_1_0 => "VERSION_1_1_0",
            ProtocolVersion::V1_3_0 => "VERSION_1_3_0",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_masks_round_trip() {
        for mask in [0x1, 0x2, 0x4, 0x6, 0x8, 0x9, 0xA, 0xB, 0xC, 0xE, 0xF] {
            assert_eq!(CompositeMode::from_mask(mask).unwrap().mask(), mask);
        }
        assert!(CompositeMode::from_mask(0x0).is_none());
        assert!(CompositeMode::from_mask(0x10).is_none());
    }

    #[test]
    fn transfer_truth_tables() {
        assert!(!TransferFunction::Black.apply(true, true));
        assert!(TransferFunction::White.apply(false, false));
        assert!(TransferFunction::Xor.apply(true, false));
        assert!(!TransferFunction::Xor.apply(true, true));
        assert!(TransferFunction::And.apply(true, true));
        assert!(!TransferFunction::And.apply(true, false));
    }

    #[test]
    fn version_negotiation_orders() {
        let client = ProtocolVersion::from_token("1.1.0").unwrap();
        let server = ProtocolVersion::V1_3_0;
        assert_eq!(client.min(server), ProtocolVersion::V1_1_0);
        assert!(ProtocolVersion::from_token("2.0.0").is_none());
    }
}
