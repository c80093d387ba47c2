//! Payment reference codec.
//!
//! Every underlying-chain payment participating in the protocol carries a
//! fixed-width 256-bit tag: the high 64 bits are a type tag (48-bit magic
//! prefix + 16-bit type index) and the low 192 bits are the payload — a
//! request id for ticketed types, or an address for topup/self-mint. The
//! challenger correlates off-ledger payments with on-ledger requests through
//! these tags, so decoding must never panic on hostile input.

use primitive_types::U256;

/// Bit offset of the type tag region.
pub const TYPE_SHIFT: usize = 192;

/// Magic prefix occupying the high 48 bits of every well-formed reference.
pub const MAGIC_PREFIX: u64 = 0x4642_5052_6641;

const TYPE_INDEX_BITS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Minting = 0x0001,
    Redemption = 0x0002,
    AnnouncedWithdrawal = 0x0003,
    ReturnFromCoreVault = 0x0004,
    RedemptionFromCoreVault = 0x0005,
    Topup = 0x0011,
    SelfMint = 0x0012,
}

impl ReferenceType {
    pub fn from_index(index: u16) -> Option<Self> {
        match index {
            0x0001 => Some(ReferenceType::Minting),
            0x0002 => Some(ReferenceType::Redemption),
            0x0003 => Some(ReferenceType::AnnouncedWithdrawal),
            0x0004 => Some(ReferenceType::ReturnFromCoreVault),
            0x0005 => Some(ReferenceType::RedemptionFromCoreVault),
            0x0011 => Some(ReferenceType::Topup),
            0x0012 => Some(ReferenceType::SelfMint),
            _ => None,
        }
    }

    /// Full 64-bit type tag: magic prefix in the high 48 bits, index below.
    pub fn tag(self) -> u64 {
        (MAGIC_PREFIX << TYPE_INDEX_BITS) | self as u64
    }
}

/// A 256-bit payment reference. Construct via `encode` or the per-type
/// helpers; arbitrary on-chain values come in through `from_raw` and must be
/// checked with `is_valid` before `decode` output means anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentReference(U256);

impl PaymentReference {
    pub fn from_raw(value: U256) -> Self {
        PaymentReference(value)
    }

    pub fn raw(&self) -> U256 {
        self.0
    }

    /// Encode a type tag and payload. Returns None if the payload does not
    /// fit in the low 192 bits.
    pub fn encode(kind: ReferenceType, payload: U256) -> Option<Self> {
        if payload >> TYPE_SHIFT != U256::zero() {
            return None;
        }
        Some(PaymentReference((U256::from(kind.tag()) << TYPE_SHIFT) | payload))
    }

    pub fn minting(id: u64) -> Self {
        Self::encode(ReferenceType::Minting, U256::from(id)).unwrap()
    }

    pub fn redemption(id: u64) -> Self {
        Self::encode(ReferenceType::Redemption, U256::from(id)).unwrap()
    }

    pub fn announced_withdrawal(id: u64) -> Self {
        Self::encode(ReferenceType::AnnouncedWithdrawal, U256::from(id)).unwrap()
    }

    pub fn return_from_core_vault(id: u64) -> Self {
        Self::encode(ReferenceType::ReturnFromCoreVault, U256::from(id)).unwrap()
    }

    pub fn redemption_from_core_vault(id: u64) -> Self {
        Self::encode(ReferenceType::RedemptionFromCoreVault, U256::from(id)).unwrap()
    }

    /// Topup/self-mint payloads are a chain address right-aligned into the
    /// low bits; 160-bit addresses always fit.
    pub fn topup(address: U256) -> Option<Self> {
        Self::encode(ReferenceType::Topup, address)
    }

    pub fn self_mint(address: U256) -> Option<Self> {
        Self::encode(ReferenceType::SelfMint, address)
    }

    /// Well-formed means the high 48 bits carry the magic prefix. Malformed
    /// references are invalid regardless of payload.
    pub fn is_valid(&self) -> bool {
        (self.0 >> (TYPE_SHIFT + TYPE_INDEX_BITS)) == U256::from(MAGIC_PREFIX)
    }

    pub fn type_index(&self) -> u16 {
        ((self.0 >> TYPE_SHIFT).low_u64() & 0xFFFF) as u16
    }

    pub fn payload(&self) -> U256 {
        self.0 & ((U256::one() << TYPE_SHIFT) - U256::one())
    }

    /// Decode into (type, payload). None for an invalid prefix or an unknown
    /// type index; never panics.
    pub fn decode(&self) -> Option<(ReferenceType, U256)> {
        if !self.is_valid() {
            return None;
        }
        let kind = ReferenceType::from_index(self.type_index())?;
        Some((kind, self.payload()))
    }

    /// Parse the `0x`-prefixed 32-byte hex rendering chain indexers deliver.
    /// None on anything malformed; validity is a separate question.
    pub fn from_hex(s: &str) -> Option<Self> {
        let digits = s.strip_prefix("0x")?;
        if digits.len() != 64 {
            return None;
        }
        let bytes = hex::decode(digits).ok()?;
        Some(PaymentReference(U256::from_big_endian(&bytes)))
    }

    pub fn to_hex(&self) -> String {
        format!("{:#066x}", self.0)
    }
}

impl std::fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: &[ReferenceType] = &[
        ReferenceType::Minting,
        ReferenceType::Redemption,
        ReferenceType::AnnouncedWithdrawal,
        ReferenceType::ReturnFromCoreVault,
        ReferenceType::RedemptionFromCoreVault,
        ReferenceType::Topup,
        ReferenceType::SelfMint,
    ];

    #[test]
    fn test_round_trip_all_types() {
        for &kind in ALL_TYPES {
            for payload in [0u64, 1, 42, u64::MAX] {
                let r = PaymentReference::encode(kind, U256::from(payload)).unwrap();
                assert!(r.is_valid());
                assert_eq!(r.decode(), Some((kind, U256::from(payload))));
            }
        }
    }

    #[test]
    fn test_round_trip_max_payload() {
        let max_payload = (U256::one() << TYPE_SHIFT) - U256::one();
        let r = PaymentReference::encode(ReferenceType::Redemption, max_payload).unwrap();
        assert_eq!(r.decode(), Some((ReferenceType::Redemption, max_payload)));
    }

    #[test]
    fn test_payload_overflow_rejected() {
        let too_big = U256::one() << TYPE_SHIFT;
        assert!(PaymentReference::encode(ReferenceType::Minting, too_big).is_none());
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(!PaymentReference::from_raw(U256::zero()).is_valid());
        assert!(!PaymentReference::from_raw(U256::from(12345u64)).is_valid());
        // correct type index, corrupted prefix
        let bad = (U256::from(0x1111_1111_1111_0002u64)) << TYPE_SHIFT;
        let r = PaymentReference::from_raw(bad | U256::from(7u64));
        assert!(!r.is_valid());
        assert_eq!(r.decode(), None);
    }

    #[test]
    fn test_valid_prefix_unknown_type_index() {
        let tag = (MAGIC_PREFIX << 16) | 0x00FF;
        let r = PaymentReference::from_raw(U256::from(tag) << TYPE_SHIFT);
        assert!(r.is_valid());
        assert_eq!(r.decode(), None);
    }

    #[test]
    fn test_redemption_helper_matches_encode() {
        assert_eq!(
            PaymentReference::redemption(77),
            PaymentReference::encode(ReferenceType::Redemption, U256::from(77u64)).unwrap()
        );
    }

    #[test]
    fn test_topup_address_payload() {
        // 160-bit address right-aligned
        let addr = (U256::one() << 159) | U256::from(0xdeadbeefu64);
        let r = PaymentReference::topup(addr).unwrap();
        assert_eq!(r.decode(), Some((ReferenceType::Topup, addr)));
    }

    #[test]
    fn test_hex_round_trip() {
        let r = PaymentReference::redemption(12345);
        assert_eq!(PaymentReference::from_hex(&r.to_hex()), Some(r));
        assert_eq!(PaymentReference::from_hex("0x123"), None);
        assert_eq!(PaymentReference::from_hex("nonsense"), None);
        // right length, not hex
        assert_eq!(PaymentReference::from_hex(&format!("0x{}", "zz".repeat(32))), None);
    }

    #[test]
    fn test_hex_rendering_has_prefix() {
        let r = PaymentReference::redemption(1);
        let hex = r.to_hex();
        assert!(hex.starts_with("0x464250526641"), "got {}", hex);
        assert_eq!(hex.len(), 66);
    }
}
