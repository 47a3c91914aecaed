use crate::{AddressError, Frame, MsrFrame, PciAddress, PciFrame};
use proptest::prelude::*;

prop_compose! {
    fn arb_function()(
        bus in any::<u8>(),
        device in 0u8..32,
        function in 0u8..8,
        offset in 0u16..0x1000,
    ) -> PciAddress {
        PciAddress::new(bus, device, function).with_offset(offset)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn ecam_offset_follows_formula(addr in arb_function()) {
        let expected = u64::from(addr.offset)
            + ((u64::from(addr.bus) * 32 + u64::from(addr.device)) * 8 + u64::from(addr.function))
                * 0x1000;
        prop_assert_eq!(addr.ecam_offset(), expected);
    }

    #[test]
    fn ecam_offset_is_monotonic_in_register(addr in arb_function(), other in 0u16..0x1000) {
        let a = addr.with_offset(addr.offset.min(other));
        let b = addr.with_offset(addr.offset.max(other));
        prop_assert!(a.ecam_offset() <= b.ecam_offset());
        prop_assert_eq!(b.ecam_offset() - a.ecam_offset(), u64::from(b.offset - a.offset));
    }

    #[test]
    fn add_then_sub_is_identity(addr in arb_function(), n in 0u16..0x1000) {
        match addr.checked_add(n) {
            Ok(moved) => prop_assert_eq!(moved.checked_sub(n), Ok(addr)),
            Err(err) => {
                prop_assert!(u32::from(addr.offset) + u32::from(n) >= 0x1000);
                prop_assert_eq!(err, AddressError::Overflow { offset: addr.offset, delta: i32::from(n) });
            }
        }
    }

    #[test]
    fn msr_frame_preserves_full_value(number in any::<u32>(), value in any::<u64>()) {
        let frame = MsrFrame { number, value };
        prop_assert_eq!(MsrFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn truncated_pci_frames_never_decode(addr in arb_function(), cut in 0usize..12) {
        let bytes = PciFrame::new(addr, 0).encode();
        prop_assert!(PciFrame::decode(&bytes[..cut]).is_err());
    }
}
