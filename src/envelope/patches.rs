//! YM2413 built-in instrument patches
//!
//! Each preset is the chip's 8-byte patch in register order (0x00-0x07).
//! Only the carrier's envelope matters here: KSR is bit 4 of byte 1,
//! AR/DR are byte 5 and SL/RR are byte 7.

use super::PatchParams;

/// Preset patches for instruments 1-15
pub const ROM_PATCHES: [[u8; 8]; 15] = [
    [0x71, 0x61, 0x1E, 0x17, 0xD0, 0x78, 0x00, 0x17], // violin
    [0x13, 0x41, 0x16, 0x0E, 0xD8, 0xF6, 0x23, 0x12], // guitar
    [0x13, 0x01, 0x19, 0x0F, 0xD8, 0xF6, 0x13, 0x02], // piano
    [0x31, 0x61, 0x1A, 0x0D, 0xC8, 0x64, 0x70, 0x13], // flute
    [0x22, 0x21, 0x1E, 0x06, 0xE0, 0x76, 0x22, 0x12], // clarinet
    [0x21, 0x61, 0x1D, 0x07, 0x82, 0x6A, 0x20, 0x11], // oboe
    [0x23, 0x21, 0x22, 0x17, 0xA2, 0x64, 0x21, 0x61], // trumpet
    [0x61, 0x61, 0x0E, 0x07, 0xA0, 0x71, 0x00, 0x13], // organ
    [0x23, 0x21, 0x1E, 0x07, 0xE0, 0x71, 0x22, 0x21], // horn
    [0x21, 0x20, 0x0C, 0x08, 0xA0, 0x73, 0x22, 0x21], // synthesizer
    [0x13, 0x41, 0x18, 0x0F, 0xF8, 0xF4, 0x23, 0x13], // harpsichord
    [0x31, 0x61, 0x0C, 0x08, 0xB0, 0x72, 0x73, 0x13], // vibraphone
    [0x61, 0x61, 0x1E, 0x07, 0xD0, 0x70, 0x00, 0x17], // synth bass
    [0x21, 0x61, 0x1E, 0x07, 0xC8, 0x76, 0x22, 0x13], // wood bass
    [0x13, 0x01, 0x1A, 0x0F, 0xE8, 0xF6, 0x13, 0x02], // electric guitar
];

/// Carrier envelope of an 8-byte patch in register order
pub fn user_patch(bytes: &[u8; 8]) -> PatchParams {
    PatchParams {
        ar: bytes[5] >> 4,
        dr: bytes[5] & 0x0F,
        sl: bytes[7] >> 4,
        rr: bytes[7] & 0x0F,
        ksr: bytes[1] & 0x10 != 0,
    }
}

/// Carrier envelope of a ROM instrument (1-15); 0 is the user patch
pub fn rom_patch(instrument: u8) -> Option<PatchParams> {
    let index = usize::from(instrument).checked_sub(1)?;
    ROM_PATCHES.get(index).map(user_patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rom_lookup() {
        assert!(rom_patch(0).is_none());
        assert!(rom_patch(16).is_none());
        let violin = rom_patch(1).unwrap();
        assert_eq!((violin.ar, violin.dr, violin.sl, violin.rr), (7, 8, 1, 7));
        assert!(!violin.ksr);
        let piano = rom_patch(3).unwrap();
        assert_eq!((piano.ar, piano.dr, piano.sl, piano.rr), (15, 6, 0, 2));
    }

    #[test]
    fn test_all_presets_valid() {
        for inst in 1..=15 {
            assert!(rom_patch(inst).unwrap().is_valid());
        }
    }

    #[test]
    fn test_user_patch_ksr_bit() {
        let patch = user_patch(&[0x00, 0x10, 0, 0, 0, 0xA5, 0, 0x3C]);
        assert!(patch.ksr);
        assert_eq!((patch.ar, patch.dr, patch.sl, patch.rr), (10, 5, 3, 12));
    }
}
